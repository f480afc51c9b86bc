//! Who is acting
//!
//! Authentication happens outside this crate. An `IdentityProvider` tells the
//! engines which principal is behind the current request; the engines then
//! load that principal's roles inside their own transaction, so rights are
//! always evaluated against committed memberships.

use crate::core::error::{Result, TreeError};
use crate::core::ids::{RoleId, UserId};
use parking_lot::RwLock;

/// Authenticated principal as reported by the identity provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub user: UserId,
    /// Platform administrators bypass permission checks
    pub admin: bool,
}

impl Principal {
    pub fn user(user: UserId) -> Self {
        Principal { user, admin: false }
    }

    pub fn admin(user: UserId) -> Self {
        Principal { user, admin: true }
    }
}

/// Principal plus the roles it holds (directly or through groups)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user: UserId,
    pub admin: bool,
    pub roles: Vec<RoleId>,
}

impl Actor {
    pub fn has_role(&self, role: RoleId) -> bool {
        self.roles.contains(&role)
    }
}

pub trait IdentityProvider: Send + Sync {
    /// Principal behind the current request, None when anonymous
    fn current(&self) -> Option<Principal>;

    fn require(&self) -> Result<Principal> {
        self.current()
            .ok_or_else(|| TreeError::PermissionDenied("no authenticated user".to_string()))
    }
}

/// Fixed principal, for batch jobs and tooling
pub struct StaticIdentity(pub Principal);

impl IdentityProvider for StaticIdentity {
    fn current(&self) -> Option<Principal> {
        Some(self.0)
    }
}

/// Principal switched at runtime (login/logout)
#[derive(Default)]
pub struct SessionIdentity {
    current: RwLock<Option<Principal>>,
}

impl SessionIdentity {
    pub fn new() -> Self {
        SessionIdentity::default()
    }

    pub fn sign_in(&self, principal: Principal) {
        *self.current.write() = Some(principal);
    }

    pub fn sign_out(&self) {
        *self.current.write() = None;
    }
}

impl IdentityProvider for SessionIdentity {
    fn current(&self) -> Option<Principal> {
        *self.current.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_switching() {
        let session = SessionIdentity::new();
        assert!(session.current().is_none());
        assert!(matches!(
            session.require(),
            Err(TreeError::PermissionDenied(_))
        ));

        session.sign_in(Principal::user(UserId(4)));
        assert_eq!(session.require().unwrap().user, UserId(4));
        assert!(!session.require().unwrap().admin);

        session.sign_out();
        assert!(session.current().is_none());
    }

    #[test]
    fn test_static_identity() {
        let identity = StaticIdentity(Principal::admin(UserId(1)));
        assert!(identity.require().unwrap().admin);
    }
}
