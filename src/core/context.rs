//! Collaborators shared by the engines

use crate::core::audit::{AuditLogger, Operation, Target};
use crate::core::error::Result;
use crate::core::icon::IconStore;
use crate::core::identity::{Actor, IdentityProvider, Principal};
use crate::core::ids::UserId;
use crate::core::registry::ResourceTypeRegistry;
use crate::core::store::{with_transaction, Store, TxMode, UnitOfWork};
use std::sync::Arc;

/// Everything an engine needs besides its own logic
pub struct TreeContext {
    pub store: Arc<dyn Store>,
    pub identity: Arc<dyn IdentityProvider>,
    pub registry: Arc<ResourceTypeRegistry>,
    pub icons: Arc<dyn IconStore>,
    pub audit: Option<Arc<AuditLogger>>,
    pub max_conflict_retries: u32,
    /// Page size used when a listing does not ask for one
    pub per_page: u32,
}

impl TreeContext {
    /// Run `op` in a unit of work, retrying storage conflicts
    pub fn transaction<T, F>(&self, mode: TxMode, op: F) -> Result<T>
    where
        F: FnMut(&mut dyn UnitOfWork) -> Result<T>,
    {
        with_transaction(self.store.as_ref(), mode, self.max_conflict_retries, op)
    }

    pub fn principal(&self) -> Result<Principal> {
        self.identity.require()
    }

    /// The principal with the roles it currently holds
    pub fn actor(&self, uow: &dyn UnitOfWork, principal: Principal) -> Result<Actor> {
        Ok(Actor {
            user: principal.user,
            admin: principal.admin,
            roles: uow.roles_of_user(principal.user)?,
        })
    }

    pub fn record(&self, actor: UserId, operation: Operation, target: Target, id: i64) {
        if let Some(audit) = &self.audit {
            audit.record(actor, operation, target, id);
        }
    }
}
