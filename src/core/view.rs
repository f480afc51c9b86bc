//! Serializable projections of nodes handed to callers

use crate::core::icon::IconStore;
use crate::core::node::ResourceNode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Flat JSON view of a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeView {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub workspace_id: i64,
    pub parent_id: Option<i64>,
    pub path: String,
    pub position: i64,
    pub creator_id: i64,
    pub created_at: DateTime<Utc>,
    pub icon_url: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub target_id: Option<i64>,
}

impl NodeView {
    pub fn new(node: &ResourceNode, icons: &dyn IconStore) -> Self {
        NodeView {
            id: node.id.get(),
            name: node.name.clone(),
            resource_type: node.resource_type.clone(),
            workspace_id: node.workspace.get(),
            parent_id: node.parent.map(|p| p.get()),
            path: node.path.as_str().to_string(),
            position: node.position,
            creator_id: node.creator.get(),
            created_at: node.created_at,
            icon_url: icons.relative_url(&node.icon),
            target_id: node.kind.shortcut_target().map(|t| t.get()),
        }
    }
}

/// Result of a properties change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertiesView {
    pub name: String,
    /// Icon URL relative to the web root
    pub icon: String,
}

impl PropertiesView {
    pub fn new(node: &ResourceNode, icons: &dyn IconStore) -> Self {
        PropertiesView {
            name: node.name.clone(),
            icon: icons.relative_url(&node.icon),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::icon::{DirIconStore, IconRef};
    use crate::core::ids::{NodeId, UserId, WorkspaceId};
    use crate::core::node::NodeKind;
    use crate::core::path::MaterializedPath;

    #[test]
    fn test_shortcut_view_json() {
        let icons = DirIconStore::new("/srv/icons", "/uploads");
        let node = ResourceNode {
            id: NodeId(7),
            name: "Syllabus".to_string(),
            workspace: WorkspaceId(1),
            parent: Some(NodeId(1)),
            resource_type: "text".to_string(),
            kind: NodeKind::Shortcut { target: NodeId(3) },
            icon: IconRef::default_for("icons/text.png").shortcut_variant(),
            creator: UserId(2),
            created_at: Utc::now(),
            position: 4,
            path: MaterializedPath::parse("/1/7/").unwrap(),
            version: 1,
        };

        let view = NodeView::new(&node, &icons);
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["type"], "text");
        assert_eq!(json["parentId"], 1);
        assert_eq!(json["targetId"], 3);
        assert_eq!(json["iconUrl"], "/uploads/shortcut/icons/text.png");

        let back: NodeView = serde_json::from_value(json).unwrap();
        assert_eq!(back, view);
    }

    #[test]
    fn test_plain_node_has_no_target() {
        let icons = DirIconStore::new("/srv/icons", "/uploads");
        let node = ResourceNode {
            id: NodeId(1),
            name: "Biology".to_string(),
            workspace: WorkspaceId(1),
            parent: None,
            resource_type: "directory".to_string(),
            kind: NodeKind::Directory,
            icon: IconRef::default_for("icons/directory.png"),
            creator: UserId(2),
            created_at: Utc::now(),
            position: 0,
            path: MaterializedPath::root(NodeId(1)),
            version: 1,
        };

        let json = serde_json::to_value(NodeView::new(&node, &icons)).unwrap();
        assert!(json.get("targetId").is_none());
        assert!(json["parentId"].is_null());
    }
}
