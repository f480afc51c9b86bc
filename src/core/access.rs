//! Access propagation
//!
//! Rights on a node are the union of the capabilities granted there to the
//! roles the actor holds; platform administrators hold everything. Entries
//! are never computed lazily from ancestors: whenever the mutation engine
//! creates or moves nodes it calls the propagation helpers below, so every
//! node carries its own complete permission set.
//!
//! The engine also provisions workspaces and workspace roles and manages
//! role memberships.

use crate::core::audit::{Operation, Target};
use crate::core::context::TreeContext;
use crate::core::error::{Result, TreeError};
use crate::core::identity::Actor;
use crate::core::ids::{GroupId, NodeId, RoleId, UserId, WorkspaceId};
use crate::core::node::{NodeDraft, NodeKind, ResourceNode};
use crate::core::permission::{Capabilities, Capability, PermissionEntry};
use crate::core::registry::{ResourceTypeRegistry, DIRECTORY};
use crate::core::role::{
    manager_role_name, Group, Role, Subject, User, Workspace, COLLABORATOR_LABEL, MANAGER_LABEL,
    VISITOR_LABEL,
};
use crate::core::store::{TxMode, UnitOfWork};
use crate::core::tree::insert_child;
use crate::core::validation::{workspace_role_name, ResourceName, RoleLabel};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Capabilities of `actor` on `node`
pub(crate) fn rights(
    uow: &dyn UnitOfWork,
    actor: &Actor,
    node: NodeId,
    registry: &ResourceTypeRegistry,
) -> Result<Capabilities> {
    if actor.admin {
        return Ok(Capabilities::full(registry.names()));
    }
    uow.effective(node, &actor.roles)
}

/// Fail with `PermissionDenied` unless `actor` may perform `capability` on `node`
pub(crate) fn require(
    uow: &dyn UnitOfWork,
    actor: &Actor,
    node: &ResourceNode,
    capability: Capability,
    registry: &ResourceTypeRegistry,
) -> Result<()> {
    if rights(uow, actor, node.id, registry)?.allows(&capability) {
        Ok(())
    } else {
        Err(TreeError::PermissionDenied(format!(
            "user {} may not {} on node {}",
            actor.user, capability, node.id
        )))
    }
}

/// Copy every entry of `parent` onto `child`
pub(crate) fn inherit_from_parent(
    uow: &mut dyn UnitOfWork,
    parent: NodeId,
    child: NodeId,
) -> Result<usize> {
    let entries = uow.permissions_for(parent)?;
    for entry in &entries {
        uow.grant(child, entry.role, &entry.capabilities)?;
    }
    Ok(entries.len())
}

/// Entries at `destination` that reflect the actor's own rights there
///
/// Only roles the actor holds count; administrators carry every entry of the
/// destination. An actor without a grant gets an empty list.
pub(crate) fn actor_grants(
    uow: &dyn UnitOfWork,
    actor: &Actor,
    destination: NodeId,
) -> Result<Vec<PermissionEntry>> {
    Ok(uow
        .permissions_for(destination)?
        .into_iter()
        .filter(|entry| actor.admin || actor.has_role(entry.role))
        .collect())
}

pub(crate) fn apply_grants(
    uow: &mut dyn UnitOfWork,
    node: NodeId,
    grants: &[PermissionEntry],
) -> Result<()> {
    for entry in grants {
        uow.grant(node, entry.role, &entry.capabilities)?;
    }
    Ok(())
}

/// Re-anchor the permissions of a subtree that moved to another workspace:
/// roles of the old workspace lose their entries, the new parent's entries
/// are inherited by every node of the subtree.
pub(crate) fn rehome(
    uow: &mut dyn UnitOfWork,
    moved: &ResourceNode,
    new_parent: &ResourceNode,
) -> Result<()> {
    let revoked = uow.revoke_foreign_roles(moved, new_parent.workspace)?;
    let inherited = uow.permissions_for(new_parent.id)?;

    let mut subtree = vec![moved.id];
    subtree.extend(uow.find_descendants(moved)?.into_iter().map(|n| n.id));
    for node in &subtree {
        apply_grants(uow, *node, &inherited)?;
    }

    debug!(
        "Rehomed {} nodes into workspace {} ({} entries revoked)",
        subtree.len(),
        new_parent.workspace,
        revoked
    );
    Ok(())
}

fn manager_role(uow: &dyn UnitOfWork, workspace: &Workspace) -> Result<Role> {
    uow.find_role_by_name(&manager_role_name(&workspace.guid))?
        .ok_or_else(|| TreeError::not_found("manager role of workspace", workspace.id))
}

/// Manager role of `workspace`, provided the actor may manage it
pub(crate) fn require_manager(
    uow: &dyn UnitOfWork,
    actor: &Actor,
    workspace: &Workspace,
) -> Result<Role> {
    let manager = manager_role(uow, workspace)?;
    if actor.admin || actor.has_role(manager.id) {
        Ok(manager)
    } else {
        Err(TreeError::PermissionDenied(format!(
            "user {} does not manage workspace {}",
            actor.user, workspace.id
        )))
    }
}

/// The role, provided it belongs to `workspace`
pub(crate) fn workspace_role(
    uow: &dyn UnitOfWork,
    workspace: &Workspace,
    role: RoleId,
) -> Result<Role> {
    let role = uow.find_role(role)?;
    if role.workspace != Some(workspace.id) {
        return Err(TreeError::not_found("role", role.id));
    }
    Ok(role)
}

/// Workspace-scoped roles need the workspace management right, platform
/// roles need an administrator. Returns the workspace of scoped roles.
pub(crate) fn require_role_manager(
    uow: &dyn UnitOfWork,
    actor: &Actor,
    role: &Role,
) -> Result<Option<Workspace>> {
    match role.workspace {
        Some(id) => {
            let workspace = uow.find_workspace(id)?;
            require_manager(uow, actor, &workspace)?;
            Ok(Some(workspace))
        }
        None if actor.admin => Ok(None),
        None => Err(TreeError::PermissionDenied(format!(
            "platform role {} is reserved to administrators",
            role.name
        ))),
    }
}

fn require_admin(actor: &Actor, what: &str) -> Result<()> {
    if actor.admin {
        Ok(())
    } else {
        Err(TreeError::PermissionDenied(format!(
            "user {} may not {}",
            actor.user, what
        )))
    }
}

/// Refuse to leave a workspace without anyone holding its manager role
fn ensure_manager_remains(uow: &dyn UnitOfWork, role: &Role) -> Result<()> {
    let Some(id) = role.workspace else {
        return Ok(());
    };
    let workspace = uow.find_workspace(id)?;
    if role.is_manager_of(&workspace) && uow.count_role_users(role.id)? == 0 {
        return Err(TreeError::LastManager(workspace.id));
    }
    Ok(())
}

/// Result of `provision_workspace`
#[derive(Debug, Clone)]
pub struct ProvisionedWorkspace {
    pub workspace: Workspace,
    pub root: ResourceNode,
    pub manager: Role,
    pub collaborator: Role,
    pub visitor: Role,
}

/// Result of `remove_role`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovedRole {
    pub role: Role,
    pub revoked_permissions: usize,
    pub removed_memberships: usize,
}

/// Role, permission and membership management
pub struct AccessEngine {
    ctx: Arc<TreeContext>,
}

impl AccessEngine {
    pub fn new(ctx: Arc<TreeContext>) -> Self {
        AccessEngine { ctx }
    }

    /// Create a workspace with its default roles and root directory; the
    /// acting user becomes its manager.
    pub fn provision_workspace(&self, name: &str, code: &str) -> Result<ProvisionedWorkspace> {
        let principal = self.ctx.principal()?;
        let name = ResourceName::new(name)?;
        let code = code.trim();
        if code.is_empty() {
            return Err(TreeError::InvalidName(
                "workspace code cannot be empty".to_string(),
            ));
        }
        let registry = &self.ctx.registry;

        let provisioned = self.ctx.transaction(TxMode::Write, |uow| {
            let guid = Uuid::new_v4().to_string();
            let workspace = uow.create_workspace(&guid, name.as_str(), code)?;

            let manager =
                uow.create_role(&manager_role_name(&guid), MANAGER_LABEL, Some(workspace.id))?;
            let collaborator_label = RoleLabel::new(COLLABORATOR_LABEL)?;
            let collaborator = uow.create_role(
                &workspace_role_name(&collaborator_label, &guid),
                COLLABORATOR_LABEL,
                Some(workspace.id),
            )?;
            let visitor_label = RoleLabel::new(VISITOR_LABEL)?;
            let visitor = uow.create_role(
                &workspace_role_name(&visitor_label, &guid),
                VISITOR_LABEL,
                Some(workspace.id),
            )?;

            let root = uow.insert(&NodeDraft::workspace_root(
                workspace.id,
                name.as_str(),
                registry.default_icon(DIRECTORY)?,
                principal.user,
            ))?;

            uow.grant(root.id, manager.id, &Capabilities::full(registry.names()))?;
            uow.grant(
                root.id,
                collaborator.id,
                &Capabilities::from_mask(
                    Capabilities::OPEN | Capabilities::COPY | Capabilities::EXPORT,
                ),
            )?;
            uow.grant(
                root.id,
                visitor.id,
                &Capabilities::from_mask(Capabilities::OPEN),
            )?;
            uow.associate_role(Subject::User(principal.user), manager.id)?;

            Ok(ProvisionedWorkspace {
                workspace,
                root,
                manager,
                collaborator,
                visitor,
            })
        })?;

        info!(
            "Provisioned workspace '{}' ({}) with root {}",
            provisioned.workspace.name, provisioned.workspace.code, provisioned.root.id
        );
        self.ctx.record(
            principal.user,
            Operation::Create,
            Target::Workspace,
            provisioned.workspace.id.get(),
        );
        Ok(provisioned)
    }

    /// Create `ROLE_WS_<LABEL>_<guid>`.
    ///
    /// With `require_directory`, a directory named after the label is created
    /// under the workspace root in the same transaction. The new role and the
    /// manager role both receive every capability on it, with every
    /// registered type creatable.
    pub fn create_workspace_role(
        &self,
        workspace: WorkspaceId,
        label: &str,
        require_directory: bool,
    ) -> Result<Role> {
        let principal = self.ctx.principal()?;
        let label = RoleLabel::new(label)?;
        let registry = &self.ctx.registry;

        let role = self.ctx.transaction(TxMode::Write, |uow| {
            let actor = self.ctx.actor(uow, principal)?;
            let workspace = uow.find_workspace(workspace)?;
            let manager = require_manager(uow, &actor, &workspace)?;

            let name = workspace_role_name(&label, &workspace.guid);
            if uow.find_role_by_name(&name)?.is_some() {
                return Err(TreeError::AlreadyExists(format!("role {}", name)));
            }
            let role = uow.create_role(&name, label.as_str(), Some(workspace.id))?;

            if require_directory {
                let root = uow.find_workspace_root(workspace.id)?;
                let directory = insert_child(
                    uow,
                    &root,
                    ResourceName::new(label.as_str())?,
                    DIRECTORY,
                    NodeKind::Directory,
                    registry.default_icon(DIRECTORY)?,
                    actor.user,
                )?;

                let capabilities = Capabilities::full(registry.names());
                uow.grant(directory.id, role.id, &capabilities)?;
                uow.grant(directory.id, manager.id, &capabilities)?;
                debug!("Created directory {} for role {}", directory.id, role.name);
            }

            Ok(role)
        })?;

        info!("Created role {} in workspace {}", role.name, workspace);
        self.ctx
            .record(principal.user, Operation::CreateRole, Target::Role, role.id.get());
        Ok(role)
    }

    /// Change the label of a workspace role; the symbolic name is kept
    pub fn edit_role(&self, workspace: WorkspaceId, role: RoleId, label: &str) -> Result<Role> {
        let principal = self.ctx.principal()?;
        let label = RoleLabel::new(label)?;

        let role = self.ctx.transaction(TxMode::Write, |uow| {
            let actor = self.ctx.actor(uow, principal)?;
            let workspace = uow.find_workspace(workspace)?;
            require_manager(uow, &actor, &workspace)?;

            let role = workspace_role(uow, &workspace, role)?;
            if role.is_manager_of(&workspace) {
                return Err(TreeError::ProtectedRole(role.name));
            }

            let edited = Role {
                translation_key: label.as_str().to_string(),
                ..role
            };
            uow.update_role(&edited)?;
            Ok(edited)
        })?;

        self.ctx
            .record(principal.user, Operation::EditRole, Target::Role, role.id.get());
        Ok(role)
    }

    /// Delete a workspace role with all of its permission entries and
    /// memberships
    pub fn remove_role(&self, workspace: WorkspaceId, role: RoleId) -> Result<RemovedRole> {
        let principal = self.ctx.principal()?;

        let removed = self.ctx.transaction(TxMode::Write, |uow| {
            let actor = self.ctx.actor(uow, principal)?;
            let workspace = uow.find_workspace(workspace)?;
            require_manager(uow, &actor, &workspace)?;

            let role = workspace_role(uow, &workspace, role)?;
            if role.is_manager_of(&workspace) {
                return Err(TreeError::ProtectedRole(role.name));
            }

            let revoked_permissions = uow.revoke_role(role.id)?;
            let removed_memberships = uow.dissociate_all(role.id)?;
            uow.delete_role(role.id)?;

            Ok(RemovedRole {
                role,
                revoked_permissions,
                removed_memberships,
            })
        })?;

        info!(
            "Removed role {} ({} permissions, {} memberships)",
            removed.role.name, removed.revoked_permissions, removed.removed_memberships
        );
        self.ctx.record(
            principal.user,
            Operation::RemoveRole,
            Target::Role,
            removed.role.id.get(),
        );
        Ok(removed)
    }

    /// Roles of a workspace, ordered by id
    pub fn workspace_roles(&self, workspace: WorkspaceId) -> Result<Vec<Role>> {
        let principal = self.ctx.principal()?;
        self.ctx.transaction(TxMode::Read, |uow| {
            let actor = self.ctx.actor(uow, principal)?;
            let workspace = uow.find_workspace(workspace)?;
            require_manager(uow, &actor, &workspace)?;
            uow.roles_by_workspace(workspace.id)
        })
    }

    /// Give every user every role; returns the number of new memberships
    pub fn associate_roles(&self, users: &[UserId], roles: &[RoleId]) -> Result<usize> {
        let principal = self.ctx.principal()?;

        let added = self.ctx.transaction(TxMode::Write, |uow| {
            let actor = self.ctx.actor(uow, principal)?;
            let mut added = 0;
            for role in roles {
                let role = uow.find_role(*role)?;
                require_role_manager(uow, &actor, &role)?;
                for user in users {
                    if uow.associate_role(Subject::User(*user), role.id)? {
                        added += 1;
                    }
                }
            }
            Ok(added)
        })?;

        for role in roles {
            self.ctx
                .record(principal.user, Operation::AssignRole, Target::Role, role.get());
        }
        Ok(added)
    }

    /// Take a role away from a user or group.
    ///
    /// Fails with `LastManager` when nobody would hold the workspace's
    /// manager role afterwards.
    pub fn dissociate_role(&self, subject: Subject, role: RoleId) -> Result<bool> {
        let principal = self.ctx.principal()?;

        let removed = self.ctx.transaction(TxMode::Write, |uow| {
            let actor = self.ctx.actor(uow, principal)?;
            let role = uow.find_role(role)?;
            require_role_manager(uow, &actor, &role)?;

            let removed = uow.dissociate_role(subject, role.id)?;
            ensure_manager_remains(uow, &role)?;
            Ok(removed)
        })?;

        self.ctx
            .record(principal.user, Operation::UnassignRole, Target::Role, role.get());
        Ok(removed)
    }

    pub fn add_role_to_groups(&self, role: RoleId, groups: &[GroupId]) -> Result<usize> {
        let principal = self.ctx.principal()?;

        let added = self.ctx.transaction(TxMode::Write, |uow| {
            let actor = self.ctx.actor(uow, principal)?;
            let role = uow.find_role(role)?;
            require_role_manager(uow, &actor, &role)?;

            let mut added = 0;
            for group in groups {
                if uow.associate_role(Subject::Group(*group), role.id)? {
                    added += 1;
                }
            }
            Ok(added)
        })?;

        self.ctx
            .record(principal.user, Operation::AssignRole, Target::Role, role.get());
        Ok(added)
    }

    pub fn remove_groups_from_role(&self, role: RoleId, groups: &[GroupId]) -> Result<usize> {
        let principal = self.ctx.principal()?;

        let removed = self.ctx.transaction(TxMode::Write, |uow| {
            let actor = self.ctx.actor(uow, principal)?;
            let role = uow.find_role(role)?;
            require_role_manager(uow, &actor, &role)?;

            let mut removed = 0;
            for group in groups {
                if uow.dissociate_role(Subject::Group(*group), role.id)? {
                    removed += 1;
                }
            }
            ensure_manager_remains(uow, &role)?;
            Ok(removed)
        })?;

        self.ctx
            .record(principal.user, Operation::UnassignRole, Target::Role, role.get());
        Ok(removed)
    }

    /// Create a platform user (open registration, no identity required)
    pub fn register_user(&self, username: &str, first_name: &str, last_name: &str) -> Result<User> {
        let username = username.trim();
        if username.is_empty() || username.chars().any(char::is_whitespace) {
            return Err(TreeError::InvalidName(format!(
                "'{}' is not a valid username",
                username
            )));
        }

        let user = self.ctx.transaction(TxMode::Write, |uow| {
            uow.create_user(username, first_name.trim(), last_name.trim())
        })?;
        info!("Registered user {} ({})", user.username, user.id);
        Ok(user)
    }

    pub fn register_group(&self, name: &str) -> Result<Group> {
        let principal = self.ctx.principal()?;
        let name = ResourceName::new(name)?;

        self.ctx.transaction(TxMode::Write, |uow| {
            let actor = self.ctx.actor(uow, principal)?;
            require_admin(&actor, "create groups")?;
            uow.create_group(name.as_str())
        })
    }

    pub fn add_user_to_group(&self, group: GroupId, user: UserId) -> Result<()> {
        let principal = self.ctx.principal()?;

        self.ctx.transaction(TxMode::Write, |uow| {
            let actor = self.ctx.actor(uow, principal)?;
            require_admin(&actor, "edit group members")?;
            uow.add_user_to_group(group, user)
        })
    }

    /// Union of the capabilities the current actor holds on `node`
    pub fn effective_rights(&self, node: NodeId) -> Result<Capabilities> {
        let principal = self.ctx.principal()?;
        self.ctx.transaction(TxMode::Read, |uow| {
            let actor = self.ctx.actor(uow, principal)?;
            uow.find(node)?;
            rights(uow, &actor, node, &self.ctx.registry)
        })
    }

    pub fn check(&self, node: NodeId, capability: &Capability) -> Result<bool> {
        Ok(self.effective_rights(node)?.allows(capability))
    }

    /// Set the entry of `role` on `node` (workspace managers only)
    pub fn grant(&self, node: NodeId, role: RoleId, capabilities: Capabilities) -> Result<()> {
        let principal = self.ctx.principal()?;

        self.ctx.transaction(TxMode::Write, |uow| {
            let actor = self.ctx.actor(uow, principal)?;
            let node = uow.find(node)?;
            let workspace = uow.find_workspace(node.workspace)?;
            require_manager(uow, &actor, &workspace)?;

            let role = uow.find_role(role)?;
            if role.workspace.is_some() && role.workspace != Some(workspace.id) {
                return Err(TreeError::PermissionDenied(format!(
                    "role {} belongs to another workspace",
                    role.name
                )));
            }
            uow.grant(node.id, role.id, &capabilities)
        })
    }
}
