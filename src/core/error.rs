use crate::core::ids::{NodeId, WorkspaceId};
use rusqlite::{ffi, ErrorCode};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TreeError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: i64 },

    #[error("Invalid parent: {0}")]
    InvalidParent(String),

    #[error("Cannot move node {node} into itself or one of its descendants (target {target})")]
    CyclicMove { node: NodeId, target: NodeId },

    #[error("Unknown or unsupported resource type: {0}")]
    TypeMismatch(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Storage conflict: {0}")]
    StorageConflict(String),

    #[error("Workspace root {0} cannot be moved or deleted")]
    RootNode(NodeId),

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Role {0} is protected and cannot be removed")]
    ProtectedRole(String),

    #[error("Cannot remove the last manager of workspace {0}")]
    LastManager(WorkspaceId),

    #[error("Storage error: {0}")]
    Storage(rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl TreeError {
    pub fn not_found(kind: &'static str, id: impl Into<i64>) -> Self {
        TreeError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Errors that only affect the item being processed.
    ///
    /// Batch operations report these per item and keep going; anything else
    /// aborts the batch.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            TreeError::Storage(_)
                | TreeError::Serialization(_)
                | TreeError::Io(_)
                | TreeError::Config(_)
        )
    }
}

impl From<rusqlite::Error> for TreeError {
    fn from(err: rusqlite::Error) -> Self {
        let codes = match &err {
            rusqlite::Error::SqliteFailure(failure, _) => {
                Some((failure.code, failure.extended_code))
            }
            _ => None,
        };

        match codes {
            Some((ErrorCode::DatabaseBusy, _)) | Some((ErrorCode::DatabaseLocked, _)) => {
                TreeError::StorageConflict(err.to_string())
            }
            // A referenced row vanished under us: a concurrent delete won.
            Some((ErrorCode::ConstraintViolation, ffi::SQLITE_CONSTRAINT_FOREIGNKEY)) => {
                TreeError::StorageConflict(err.to_string())
            }
            Some((ErrorCode::ConstraintViolation, _)) => TreeError::AlreadyExists(err.to_string()),
            _ => TreeError::Storage(err),
        }
    }
}

impl From<toml::de::Error> for TreeError {
    fn from(err: toml::de::Error) -> Self {
        TreeError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TreeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(TreeError::not_found("node", 4).is_recoverable());
        assert!(TreeError::StorageConflict("busy".into()).is_recoverable());
        assert!(TreeError::CyclicMove {
            node: NodeId(1),
            target: NodeId(2)
        }
        .is_recoverable());
        assert!(!TreeError::Config("bad".into()).is_recoverable());
        assert!(!TreeError::Storage(rusqlite::Error::InvalidQuery).is_recoverable());
    }

    #[test]
    fn test_not_found_message() {
        let err = TreeError::not_found("node", 42);
        assert_eq!(err.to_string(), "node 42 not found");
    }
}
