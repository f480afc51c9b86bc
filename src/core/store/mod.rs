//! Resource node store
//!
//! The engines only see the repository traits below. A `Store` hands out
//! units of work; each unit is one storage transaction that is rolled back
//! unless `commit` is called. Every trait method runs inside the unit it is
//! called on, so a sequence of calls followed by `commit` is atomic.

mod sqlite;

pub use sqlite::SqliteStore;

use crate::core::error::{Result, TreeError};
use crate::core::ids::{GroupId, NodeId, RoleId, UserId, WorkspaceId};
use crate::core::node::{NodeDraft, ResourceNode};
use crate::core::path::MaterializedPath;
use crate::core::permission::{Capabilities, PermissionEntry};
use crate::core::role::{Group, Role, Subject, User, Workspace};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

/// Transaction flavour requested from the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxMode {
    /// Shared snapshot, no writes
    Read,
    /// Takes the write lock up front
    Write,
}

/// Criteria of a node search; empty criteria match everything
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeSearch {
    /// Case-insensitive substring of the name
    pub name_contains: Option<String>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    /// Restrict to these subtrees (empty = anywhere)
    pub within: Vec<MaterializedPath>,
    /// Restrict to these resource types (empty = any)
    pub types: Vec<String>,
    /// Only nodes one of these roles may open; None skips the check
    pub visible_to: Option<Vec<RoleId>>,
}

/// 1-based page selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub per_page: u32,
}

impl PageRequest {
    pub fn new(page: u32, per_page: u32) -> Self {
        PageRequest {
            page: page.max(1),
            per_page: per_page.max(1),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page as i64 - 1) * self.per_page as i64
    }
}

/// One page of a listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub per_page: u32,
    /// Matches across all pages
    pub total: u64,
}

impl<T> Page<T> {
    pub fn page_count(&self) -> u32 {
        ((self.total + self.per_page as u64 - 1) / self.per_page as u64) as u32
    }

    pub fn has_next(&self) -> bool {
        self.page < self.page_count()
    }

    pub fn map<U, F: FnMut(T) -> U>(self, f: F) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            per_page: self.per_page,
            total: self.total,
        }
    }
}

pub trait NodeRepository {
    fn find(&self, id: NodeId) -> Result<ResourceNode>;

    /// Workspace roots the user can reach through a direct or group role
    fn find_roots(&self, user: UserId) -> Result<Vec<ResourceNode>>;

    /// Every workspace root (platform administrators)
    fn find_all_roots(&self) -> Result<Vec<ResourceNode>>;

    fn find_workspace_root(&self, workspace: WorkspaceId) -> Result<ResourceNode>;

    /// Direct children ordered by `(position, id)`
    fn find_children(&self, parent: NodeId, type_filter: Option<&str>)
        -> Result<Vec<ResourceNode>>;

    /// Root first, `node` last
    fn find_ancestors(&self, node: &ResourceNode) -> Result<Vec<ResourceNode>>;

    /// Strict descendants, every parent listed before its children
    fn find_descendants(&self, node: &ResourceNode) -> Result<Vec<ResourceNode>>;

    /// Shortcuts pointing at any of `targets`
    fn find_shortcuts_to(&self, targets: &[NodeId]) -> Result<Vec<ResourceNode>>;

    fn search(&self, search: &NodeSearch) -> Result<Vec<ResourceNode>>;

    /// Position after the last child of `parent`
    fn next_position(&self, parent: NodeId) -> Result<i64>;

    fn insert(&mut self, draft: &NodeDraft) -> Result<ResourceNode>;

    /// Persist name and icon, failing with `StorageConflict` if the stored
    /// version moved since `node` was read
    fn update(&mut self, node: &ResourceNode) -> Result<ResourceNode>;

    /// Bump the version of `node`, claiming it for the current unit of work
    fn lock(&mut self, node: &ResourceNode) -> Result<ResourceNode>;

    /// Re-parent `node`, rewriting path and workspace of its whole subtree
    fn relocate(
        &mut self,
        node: &ResourceNode,
        new_parent: &ResourceNode,
        position: i64,
    ) -> Result<ResourceNode>;

    /// Delete `node` and its descendants, returning the number of rows removed
    fn delete_subtree(&mut self, node: &ResourceNode) -> Result<usize>;
}

pub trait PermissionRepository {
    fn permissions_for(&self, node: NodeId) -> Result<Vec<PermissionEntry>>;

    fn permission(&self, node: NodeId, role: RoleId) -> Result<Option<Capabilities>>;

    /// Union of the capabilities `roles` hold on `node`
    fn effective(&self, node: NodeId, roles: &[RoleId]) -> Result<Capabilities>;

    /// Insert or replace the entry of `role` on `node`
    fn grant(&mut self, node: NodeId, role: RoleId, capabilities: &Capabilities) -> Result<()>;

    fn revoke_role(&mut self, role: RoleId) -> Result<usize>;

    /// Drop entries in the subtree of `node` held by roles of workspaces
    /// other than `workspace`
    fn revoke_foreign_roles(&mut self, node: &ResourceNode, workspace: WorkspaceId)
        -> Result<usize>;
}

pub trait RoleRepository {
    fn create_workspace(&mut self, guid: &str, name: &str, code: &str) -> Result<Workspace>;
    fn find_workspace(&self, id: WorkspaceId) -> Result<Workspace>;
    fn find_workspace_by_code(&self, code: &str) -> Result<Option<Workspace>>;

    fn create_role(
        &mut self,
        name: &str,
        translation_key: &str,
        workspace: Option<WorkspaceId>,
    ) -> Result<Role>;
    fn find_role(&self, id: RoleId) -> Result<Role>;
    fn find_role_by_name(&self, name: &str) -> Result<Option<Role>>;

    /// Roles of a workspace ordered by id
    fn roles_by_workspace(&self, workspace: WorkspaceId) -> Result<Vec<Role>>;

    fn update_role(&mut self, role: &Role) -> Result<()>;
    fn delete_role(&mut self, role: RoleId) -> Result<()>;
}

pub trait MembershipRepository {
    fn create_user(&mut self, username: &str, first_name: &str, last_name: &str) -> Result<User>;
    fn find_user(&self, id: UserId) -> Result<User>;
    fn create_group(&mut self, name: &str) -> Result<Group>;
    fn find_group(&self, id: GroupId) -> Result<Group>;
    fn add_user_to_group(&mut self, group: GroupId, user: UserId) -> Result<()>;

    /// Returns false when the subject already held the role
    fn associate_role(&mut self, subject: Subject, role: RoleId) -> Result<bool>;

    /// Returns false when the subject did not hold the role
    fn dissociate_role(&mut self, subject: Subject, role: RoleId) -> Result<bool>;

    /// Remove every user and group membership of `role`
    fn dissociate_all(&mut self, role: RoleId) -> Result<usize>;

    /// Roles held directly or through a group, ordered by id
    fn roles_of_user(&self, user: UserId) -> Result<Vec<RoleId>>;

    /// Distinct users holding `role` directly or through a group
    fn count_role_users(&self, role: RoleId) -> Result<u64>;

    /// Users directly holding one of `roles`, ordered by last name, first
    /// name and id
    fn users_in_roles(
        &self,
        roles: &[RoleId],
        search: Option<&str>,
        page: PageRequest,
    ) -> Result<Page<User>>;

    fn users_outside_roles(
        &self,
        roles: &[RoleId],
        search: Option<&str>,
        page: PageRequest,
    ) -> Result<Page<User>>;

    /// Groups holding one of `roles`, ordered by name and id
    fn groups_in_roles(
        &self,
        roles: &[RoleId],
        search: Option<&str>,
        page: PageRequest,
    ) -> Result<Page<Group>>;

    fn groups_outside_roles(
        &self,
        roles: &[RoleId],
        search: Option<&str>,
        page: PageRequest,
    ) -> Result<Page<Group>>;
}

/// One storage transaction
pub trait UnitOfWork:
    NodeRepository + PermissionRepository + RoleRepository + MembershipRepository
{
    fn commit(self: Box<Self>) -> Result<()>;
}

pub trait Store: Send + Sync {
    fn begin(&self, mode: TxMode) -> Result<Box<dyn UnitOfWork + '_>>;
}

/// Run `op` in its own unit of work and commit it.
///
/// A `StorageConflict` rolls the unit back and replays `op` on a fresh one,
/// at most `retries` times.
pub fn with_transaction<S, T, F>(store: &S, mode: TxMode, retries: u32, mut op: F) -> Result<T>
where
    S: Store + ?Sized,
    F: FnMut(&mut dyn UnitOfWork) -> Result<T>,
{
    let mut attempt = 0;
    loop {
        let outcome = store.begin(mode).and_then(|mut uow| {
            let value = op(uow.as_mut())?;
            uow.commit()?;
            Ok(value)
        });

        match outcome {
            Err(TreeError::StorageConflict(reason)) if attempt < retries => {
                attempt += 1;
                warn!(
                    "Storage conflict ({}), retrying ({}/{})",
                    reason, attempt, retries
                );
            }
            other => return other,
        }
    }
}
