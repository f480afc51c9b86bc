//! Workspaces, roles and the subjects roles are granted to

use crate::core::ids::{GroupId, RoleId, UserId, WorkspaceId};
use serde::{Deserialize, Serialize};

/// Label of the role every workspace is created with for its managers
pub const MANAGER_LABEL: &str = "manager";
pub const COLLABORATOR_LABEL: &str = "collaborator";
pub const VISITOR_LABEL: &str = "visitor";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub guid: String,
    pub name: String,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,

    /// Symbolic name, e.g. `ROLE_WS_MANAGER_<guid>`
    pub name: String,

    /// Human label the name was derived from
    pub translation_key: String,

    /// None for platform-wide roles
    pub workspace: Option<WorkspaceId>,
}

impl Role {
    pub fn is_manager_of(&self, workspace: &Workspace) -> bool {
        self.workspace == Some(workspace.id) && self.name == manager_role_name(&workspace.guid)
    }
}

pub fn manager_role_name(guid: &str) -> String {
    format!("ROLE_WS_MANAGER_{}", guid)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
}

/// Something a role can be granted to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subject {
    User(UserId),
    Group(GroupId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manager_detection() {
        let ws = Workspace {
            id: WorkspaceId(1),
            guid: "g1".into(),
            name: "Biology".into(),
            code: "BIO".into(),
        };
        let manager = Role {
            id: RoleId(1),
            name: manager_role_name("g1"),
            translation_key: MANAGER_LABEL.into(),
            workspace: Some(WorkspaceId(1)),
        };
        let foreign = Role {
            workspace: Some(WorkspaceId(2)),
            ..manager.clone()
        };

        assert!(manager.is_manager_of(&ws));
        assert!(!foreign.is_manager_of(&ws));
    }
}
