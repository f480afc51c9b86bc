//! Resource node records
//!
//! Nodes are plain values. Engines never mutate a node in place: they derive
//! a new value (`renamed`, `with_icon`) and hand it to the repository, which
//! checks the version the value was read at.

use crate::core::icon::IconRef;
use crate::core::ids::{NodeId, UserId, WorkspaceId};
use crate::core::path::MaterializedPath;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a node is
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum NodeKind {
    /// Container for other nodes
    Directory,
    /// Uploaded file
    File { mime_type: String },
    /// Reference to another (never shortcut) node
    Shortcut { target: NodeId },
    /// Plugin resource (text, activity, ...)
    Custom,
}

impl NodeKind {
    pub fn is_directory(&self) -> bool {
        matches!(self, NodeKind::Directory)
    }

    pub fn shortcut_target(&self) -> Option<NodeId> {
        match self {
            NodeKind::Shortcut { target } => Some(*target),
            _ => None,
        }
    }

    /// Stable numeric tag used by the store
    pub(crate) fn tag(&self) -> i64 {
        match self {
            NodeKind::Directory => 0,
            NodeKind::File { .. } => 1,
            NodeKind::Shortcut { .. } => 2,
            NodeKind::Custom => 3,
        }
    }
}

/// A node of the resource tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceNode {
    pub id: NodeId,
    pub name: String,
    pub workspace: WorkspaceId,

    /// None for the root of a workspace
    pub parent: Option<NodeId>,

    /// Registered type name; shortcuts carry their target's type
    pub resource_type: String,

    pub kind: NodeKind,
    pub icon: IconRef,
    pub creator: UserId,
    pub created_at: DateTime<Utc>,

    /// Ordering key among siblings
    pub position: i64,

    /// Ancestor ids, root first, self last
    pub path: MaterializedPath,

    /// Optimistic lock counter, bumped on every write
    pub version: i64,
}

impl ResourceNode {
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn is_shortcut(&self) -> bool {
        matches!(self.kind, NodeKind::Shortcut { .. })
    }

    pub fn is_directory(&self) -> bool {
        self.kind.is_directory()
    }

    /// Whether `other` is this node or lies below it
    pub fn subtree_contains(&self, other: &ResourceNode) -> bool {
        other.path.is_within(&self.path)
    }

    pub fn renamed(&self, name: impl Into<String>) -> Self {
        ResourceNode {
            name: name.into(),
            ..self.clone()
        }
    }

    pub fn with_icon(&self, icon: IconRef) -> Self {
        ResourceNode {
            icon,
            ..self.clone()
        }
    }
}

/// Command object describing a node to insert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDraft {
    pub name: String,
    pub resource_type: String,
    pub kind: NodeKind,
    pub icon: IconRef,
    pub creator: UserId,
    pub workspace: WorkspaceId,
    pub parent: Option<NodeId>,
    pub position: i64,
}

impl NodeDraft {
    /// Draft for a node placed under `parent`
    pub fn under(
        parent: &ResourceNode,
        name: impl Into<String>,
        resource_type: impl Into<String>,
        kind: NodeKind,
        icon: IconRef,
        creator: UserId,
    ) -> Self {
        NodeDraft {
            name: name.into(),
            resource_type: resource_type.into(),
            kind,
            icon,
            creator,
            workspace: parent.workspace,
            parent: Some(parent.id),
            position: 0,
        }
    }

    /// Draft for the root directory of a workspace
    pub fn workspace_root(
        workspace: WorkspaceId,
        name: impl Into<String>,
        icon: IconRef,
        creator: UserId,
    ) -> Self {
        NodeDraft {
            name: name.into(),
            resource_type: crate::core::registry::DIRECTORY.to_string(),
            kind: NodeKind::Directory,
            icon,
            creator,
            workspace,
            parent: None,
            position: 0,
        }
    }

    pub fn at_position(mut self, position: i64) -> Self {
        self.position = position;
        self
    }
}

/// Optional metadata accepted by `create`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeMetadata {
    pub name: String,
    pub mime_type: Option<String>,
}

impl NodeMetadata {
    pub fn named(name: impl Into<String>) -> Self {
        NodeMetadata {
            name: name.into(),
            mime_type: None,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }
}
