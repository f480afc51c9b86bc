//! Shared setup for the integration tests

#![allow(dead_code)]

use resource_tree::core::store::TxMode;
use resource_tree::{
    DirIconStore, NodeId, NodeMetadata, Principal, ProvisionedWorkspace, ResourceNode,
    ResourceTree, SessionIdentity, User, UserId,
};
use std::sync::Arc;
use tempfile::TempDir;

pub struct Harness {
    pub session: Arc<SessionIdentity>,
    pub icons: Arc<DirIconStore>,
    pub tree: ResourceTree,
    _icon_root: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let icon_root = TempDir::new().unwrap();
        let icons = Arc::new(DirIconStore::new(icon_root.path(), "/uploads"));
        let session = Arc::new(SessionIdentity::new());
        let tree = ResourceTree::builder()
            .identity(session.clone())
            .icon_store(icons.clone())
            .resource_types(["text", "activity"])
            .build()
            .unwrap();

        Harness {
            session,
            icons,
            tree,
            _icon_root: icon_root,
        }
    }

    pub fn user(&self, username: &str) -> User {
        self.tree
            .access()
            .register_user(username, username, "Tester")
            .unwrap()
    }

    pub fn sign_in(&self, user: UserId) {
        self.session.sign_in(Principal::user(user));
    }

    pub fn sign_in_admin(&self, user: UserId) {
        self.session.sign_in(Principal::admin(user));
    }

    /// Register `owner`, sign in as them and provision a workspace
    pub fn workspace(&self, owner: &str, name: &str, code: &str) -> (User, ProvisionedWorkspace) {
        let owner = self.user(owner);
        self.sign_in(owner.id);
        let ws = self.tree.access().provision_workspace(name, code).unwrap();
        (owner, ws)
    }

    pub fn mkdir(&self, parent: NodeId, name: &str) -> ResourceNode {
        self.tree
            .tree()
            .create(parent, "directory", NodeMetadata::named(name))
            .unwrap()
    }

    pub fn text(&self, parent: NodeId, name: &str) -> ResourceNode {
        self.tree
            .tree()
            .create(parent, "text", NodeMetadata::named(name))
            .unwrap()
    }

    /// Node as currently stored, bypassing permission checks
    pub fn stored(&self, id: NodeId) -> Option<ResourceNode> {
        let uow = self.tree.context().store.begin(TxMode::Read).unwrap();
        uow.find(id).ok()
    }

    /// Strict descendants of `id`, parents first, bypassing permission checks
    pub fn descendants(&self, id: NodeId) -> Vec<ResourceNode> {
        let uow = self.tree.context().store.begin(TxMode::Read).unwrap();
        let node = uow.find(id).unwrap();
        uow.find_descendants(&node).unwrap()
    }

    pub fn permission_roles(&self, id: NodeId) -> Vec<resource_tree::RoleId> {
        let uow = self.tree.context().store.begin(TxMode::Read).unwrap();
        let mut roles: Vec<_> = uow
            .permissions_for(id)
            .unwrap()
            .into_iter()
            .map(|entry| entry.role)
            .collect();
        roles.sort();
        roles
    }

    pub fn names(nodes: &[ResourceNode]) -> Vec<String> {
        nodes.iter().map(|n| n.name.clone()).collect()
    }
}
