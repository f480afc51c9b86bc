//! In-memory tree used by the unit tests

use crate::core::access::{AccessEngine, ProvisionedWorkspace};
use crate::core::context::TreeContext;
use crate::core::icon::{DirIconStore, IconRef};
use crate::core::identity::{IdentityProvider, Principal, SessionIdentity};
use crate::core::ids::{NodeId, UserId};
use crate::core::node::{NodeMetadata, ResourceNode};
use crate::core::query::QueryService;
use crate::core::registry::{ResourceTypeRegistry, DIRECTORY};
use crate::core::role::User;
use crate::core::store::{SqliteStore, TxMode, UnitOfWork};
use crate::core::tree::TreeEngine;
use std::sync::Arc;
use tempfile::TempDir;

pub(crate) struct Fixture {
    pub store: Arc<SqliteStore>,
    pub session: Arc<SessionIdentity>,
    pub icons: Arc<DirIconStore>,
    pub ctx: Arc<TreeContext>,
    pub tree: TreeEngine,
    pub access: AccessEngine,
    pub query: QueryService,
    _icon_root: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let icon_root = TempDir::new().unwrap();
        let icons = Arc::new(DirIconStore::new(icon_root.path(), "/uploads"));
        let session = Arc::new(SessionIdentity::new());
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());

        let ctx = Arc::new(TreeContext {
            store: store.clone(),
            identity: session.clone(),
            registry: Arc::new(ResourceTypeRegistry::with_types(["text"]).unwrap()),
            icons: icons.clone(),
            audit: None,
            max_conflict_retries: 3,
            per_page: 20,
        });

        Fixture {
            store,
            session,
            icons,
            tree: TreeEngine::new(ctx.clone()),
            access: AccessEngine::new(ctx.clone()),
            query: QueryService::new(ctx.clone()),
            ctx,
            _icon_root: icon_root,
        }
    }

    /// Register a user named `username` (first name `username`, last name
    /// "Tester")
    pub fn user(&self, username: &str) -> User {
        self.access.register_user(username, username, "Tester").unwrap()
    }

    pub fn sign_in(&self, user: UserId) {
        self.session.sign_in(Principal::user(user));
    }

    pub fn sign_in_admin(&self, user: UserId) {
        self.session.sign_in(Principal::admin(user));
    }

    pub fn session_user(&self) -> UserId {
        self.session.require().unwrap().user
    }

    /// Register `owner`, sign in as them and provision a workspace
    pub fn workspace(&self, owner: &str, name: &str, code: &str) -> ProvisionedWorkspace {
        let owner = self.user(owner);
        self.sign_in(owner.id);
        self.access.provision_workspace(name, code).unwrap()
    }

    pub fn mkdir(&self, parent: NodeId, name: &str) -> ResourceNode {
        self.tree
            .create(parent, DIRECTORY, NodeMetadata::named(name))
            .unwrap()
    }

    pub fn with_uow<T>(&self, f: impl FnOnce(&dyn UnitOfWork) -> T) -> T {
        let uow = self.ctx.store.begin(TxMode::Read).unwrap();
        f(&*uow)
    }

    /// Make the store reject writes matching `when` on `table`; the error
    /// surfaces as a constraint violation
    pub fn reject_writes(&self, event: &str, table: &str, when: &str) {
        self.store
            .execute_batch(&format!(
                "CREATE TRIGGER reject_{event}_{table} BEFORE {event} ON {table}
                 WHEN {when}
                 BEGIN SELECT RAISE(ABORT, 'write rejected'); END;",
                event = event.to_lowercase(),
                table = table,
                when = when,
            ))
            .unwrap();
    }

    pub fn registry_names(&self) -> Vec<String> {
        self.ctx.registry.names()
    }

    pub fn icon_exists(&self, icon: &IconRef) -> bool {
        self.icons.asset_path(icon).exists()
    }
}
