//! Tree mutations
//!
//! Every single-target operation is one write transaction, replayed on
//! storage conflicts. Structural checks (roots, cycles, node kinds,
//! permissions) all run before the first write of the transaction, so a
//! rejected operation never leaves partial state behind.
//!
//! Batch operations run one transaction per item and report per-item
//! outcomes. Only unrecoverable errors (storage, I/O) abort a batch.

use crate::core::access::{
    actor_grants, apply_grants, inherit_from_parent, rehome, require,
};
use crate::core::audit::{Operation, Target};
use crate::core::context::TreeContext;
use crate::core::error::{Result, TreeError};
use crate::core::icon::{IconRef, IconUpload};
use crate::core::identity::Principal;
use crate::core::ids::{NodeId, UserId};
use crate::core::node::{NodeDraft, NodeKind, NodeMetadata, ResourceNode};
use crate::core::permission::Capability;
use crate::core::registry::SHORTCUT;
use crate::core::store::{TxMode, UnitOfWork};
use crate::core::validation::ResourceName;
use crate::core::view::PropertiesView;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Upper bound on shortcut indirections followed while resolving a node
const MAX_SHORTCUT_HOPS: usize = 16;

/// Insert a node as the last child of `parent`
pub(crate) fn insert_child(
    uow: &mut dyn UnitOfWork,
    parent: &ResourceNode,
    name: ResourceName,
    resource_type: &str,
    kind: NodeKind,
    icon: IconRef,
    creator: UserId,
) -> Result<ResourceNode> {
    let position = uow.next_position(parent.id)?;
    let draft = NodeDraft::under(parent, name.into_string(), resource_type, kind, icon, creator)
        .at_position(position);
    uow.insert(&draft)
}

/// Follow shortcuts down to the node they reference
pub(crate) fn resolve(uow: &dyn UnitOfWork, node: ResourceNode) -> Result<ResourceNode> {
    let mut current = node;
    let mut hops = 0;
    while let Some(target) = current.kind.shortcut_target() {
        hops += 1;
        if hops > MAX_SHORTCUT_HOPS {
            return Err(TreeError::InvalidParent(format!(
                "shortcut chain starting at {} does not end",
                current.id
            )));
        }
        current = uow.find(target)?;
    }
    Ok(current)
}

/// Directory receiving new children; shortcuts are dereferenced
pub(crate) fn destination(uow: &dyn UnitOfWork, id: NodeId) -> Result<ResourceNode> {
    let node = match uow.find(id) {
        Ok(node) => node,
        Err(TreeError::NotFound { .. }) => {
            return Err(TreeError::InvalidParent(format!("node {} does not exist", id)))
        }
        Err(e) => return Err(e),
    };

    let node = resolve(uow, node)?;
    if !node.is_directory() {
        return Err(TreeError::InvalidParent(format!(
            "node {} ({}) is not a directory",
            node.id, node.resource_type
        )));
    }
    Ok(node)
}

/// Outcome of one item of a batch
#[derive(Debug)]
pub struct BatchItem<T> {
    pub id: NodeId,
    pub outcome: Result<T>,
}

/// Per-item outcomes of a batch, in request order
#[derive(Debug)]
pub struct BatchReport<T> {
    pub items: Vec<BatchItem<T>>,
}

impl<T> BatchReport<T> {
    pub fn successes(&self) -> impl Iterator<Item = &T> + '_ {
        self.items.iter().filter_map(|item| item.outcome.as_ref().ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = (NodeId, &TreeError)> + '_ {
        self.items
            .iter()
            .filter_map(|item| item.outcome.as_ref().err().map(|e| (item.id, e)))
    }

    pub fn all_succeeded(&self) -> bool {
        self.items.iter().all(|item| item.outcome.is_ok())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Structural operations on the resource tree
pub struct TreeEngine {
    ctx: Arc<TreeContext>,
}

impl TreeEngine {
    pub fn new(ctx: Arc<TreeContext>) -> Self {
        TreeEngine { ctx }
    }

    /// Create a node of a registered type as the last child of `parent`.
    ///
    /// The new node inherits the parent's permission entries.
    pub fn create(
        &self,
        parent: NodeId,
        resource_type: &str,
        metadata: NodeMetadata,
    ) -> Result<ResourceNode> {
        let principal = self.ctx.principal()?;
        let registry = &self.ctx.registry;

        if resource_type == SHORTCUT {
            return Err(TreeError::TypeMismatch(
                "shortcuts are created from their target".to_string(),
            ));
        }
        let kind = registry.kind_for(resource_type, metadata.mime_type.as_deref())?;
        let icon = registry.default_icon(resource_type)?;
        let name = ResourceName::new(&metadata.name)?;

        let node = self.ctx.transaction(TxMode::Write, |uow| {
            let actor = self.ctx.actor(uow, principal)?;
            let parent = destination(uow, parent)?;
            require(
                uow,
                &actor,
                &parent,
                Capability::Create(resource_type.to_string()),
                registry,
            )?;

            let node = insert_child(
                uow,
                &parent,
                name.clone(),
                resource_type,
                kind.clone(),
                icon.clone(),
                actor.user,
            )?;
            inherit_from_parent(uow, parent.id, node.id)?;
            Ok(node)
        })?;

        debug!(
            "Created {} '{}' ({}) under {}",
            node.resource_type,
            node.name,
            node.id,
            node.parent.map(|p| p.get()).unwrap_or_default()
        );
        self.ctx
            .record(principal.user, Operation::Create, Target::Node, node.id.get());
        Ok(node)
    }

    pub fn rename(&self, node: NodeId, name: &str) -> Result<ResourceNode> {
        let principal = self.ctx.principal()?;
        let name = ResourceName::new(name)?;

        let renamed = self.ctx.transaction(TxMode::Write, |uow| {
            let actor = self.ctx.actor(uow, principal)?;
            let node = uow.find(node)?;
            require(uow, &actor, &node, Capability::Edit, &self.ctx.registry)?;
            uow.update(&node.renamed(name.as_str()))
        })?;

        self.ctx
            .record(principal.user, Operation::Rename, Target::Node, renamed.id.get());
        Ok(renamed)
    }

    /// Rename a node and optionally replace its icon.
    ///
    /// A new icon is stored as a custom asset owned by the node; the asset it
    /// replaces is removed. Shortcuts to the node switch to the shortcut
    /// variant of the new icon.
    pub fn change_properties(
        &self,
        node: NodeId,
        name: &str,
        icon: Option<IconUpload>,
    ) -> Result<PropertiesView> {
        let principal = self.ctx.principal()?;
        let name = ResourceName::new(name)?;
        let new_icon = match &icon {
            Some(upload) => Some(self.ctx.icons.create_custom_icon(upload)?),
            None => None,
        };

        let outcome = self.ctx.transaction(TxMode::Write, |uow| {
            let actor = self.ctx.actor(uow, principal)?;
            let node = uow.find(node)?;
            require(uow, &actor, &node, Capability::Edit, &self.ctx.registry)?;

            let mut replaced = Vec::new();
            let mut updated = node.renamed(name.as_str());
            if let Some(icon) = &new_icon {
                if node.icon.owns_asset() {
                    replaced.push(node.icon.clone());
                }
                updated = updated.with_icon(icon.clone());

                if !node.is_shortcut() {
                    for shortcut in uow.find_shortcuts_to(&[node.id])? {
                        if shortcut.icon.owns_asset() {
                            replaced.push(shortcut.icon.clone());
                        }
                        uow.update(&shortcut.with_icon(icon.shortcut_variant()))?;
                    }
                }
            }

            let saved = uow.update(&updated)?;
            Ok((saved, replaced))
        });

        let (saved, replaced) = match outcome {
            Ok(done) => done,
            Err(e) => {
                self.discard_icons(new_icon);
                return Err(e);
            }
        };
        self.discard_icons(replaced);

        self.ctx.record(
            principal.user,
            Operation::UpdateProperties,
            Target::Node,
            saved.id.get(),
        );
        Ok(PropertiesView::new(&saved, self.ctx.icons.as_ref()))
    }

    /// Move `node` (and its subtree) under `new_parent`.
    ///
    /// Moving a node into itself or one of its descendants fails with
    /// `CyclicMove`; moving it to its current parent is a no-op.
    pub fn move_node(&self, node: NodeId, new_parent: NodeId) -> Result<ResourceNode> {
        let principal = self.ctx.principal()?;
        let moved = self.ctx.transaction(TxMode::Write, |uow| {
            self.move_in(uow, principal, node, new_parent)
        })?;

        self.ctx
            .record(principal.user, Operation::Move, Target::Node, moved.id.get());
        Ok(moved)
    }

    fn move_in(
        &self,
        uow: &mut dyn UnitOfWork,
        principal: Principal,
        node: NodeId,
        new_parent: NodeId,
    ) -> Result<ResourceNode> {
        let registry = &self.ctx.registry;
        let actor = self.ctx.actor(uow, principal)?;
        let node = uow.find(node)?;
        if node.is_root() {
            return Err(TreeError::RootNode(node.id));
        }

        let destination = destination(uow, new_parent)?;
        if destination.path.contains(node.id) {
            return Err(TreeError::CyclicMove {
                node: node.id,
                target: destination.id,
            });
        }

        require(uow, &actor, &node, Capability::Edit, registry)?;
        require(
            uow,
            &actor,
            &destination,
            Capability::Create(node.resource_type.clone()),
            registry,
        )?;

        if node.parent == Some(destination.id) {
            debug!("Node {} already lives in {}", node.id, destination.id);
            return Ok(node);
        }

        let destination = uow.lock(&destination)?;
        let position = uow.next_position(destination.id)?;
        let moved = uow.relocate(&node, &destination, position)?;
        if moved.workspace != node.workspace {
            rehome(uow, &moved, &destination)?;
        }

        debug!("Moved {} from {} to {}", node.id, node.path, moved.path);
        Ok(moved)
    }

    /// Deep copy of `node` under `new_parent`.
    ///
    /// Copies get fresh ids, the same names, types and sibling order, their
    /// own duplicates of custom icons, and the actor's own entries at the
    /// destination as permissions.
    pub fn copy(&self, node: NodeId, new_parent: NodeId) -> Result<ResourceNode> {
        let principal = self.ctx.principal()?;
        let mut duplicated: Vec<IconRef> = Vec::new();

        let outcome = self.ctx.transaction(TxMode::Write, |uow| {
            // assets of a rolled back attempt
            self.discard_icons(duplicated.drain(..));
            self.copy_in(uow, principal, node, new_parent, &mut duplicated)
        });

        match outcome {
            Ok(copy) => {
                self.ctx
                    .record(principal.user, Operation::Copy, Target::Node, copy.id.get());
                Ok(copy)
            }
            Err(e) => {
                self.discard_icons(duplicated);
                Err(e)
            }
        }
    }

    fn copy_in(
        &self,
        uow: &mut dyn UnitOfWork,
        principal: Principal,
        node: NodeId,
        new_parent: NodeId,
        duplicated: &mut Vec<IconRef>,
    ) -> Result<ResourceNode> {
        let registry = &self.ctx.registry;
        let actor = self.ctx.actor(uow, principal)?;
        let source = uow.find(node)?;
        let destination = destination(uow, new_parent)?;

        require(uow, &actor, &source, Capability::Copy, registry)?;
        require(
            uow,
            &actor,
            &destination,
            Capability::Create(source.resource_type.clone()),
            registry,
        )?;

        let destination = uow.lock(&destination)?;
        let grants = actor_grants(uow, &actor, destination.id)?;
        let descendants = uow.find_descendants(&source)?;

        let position = uow.next_position(destination.id)?;
        let root_copy =
            self.clone_node(uow, &source, &destination, position, actor.user, duplicated)?;
        apply_grants(uow, root_copy.id, &grants)?;

        let mut copies: HashMap<NodeId, ResourceNode> = HashMap::new();
        copies.insert(source.id, root_copy.clone());

        for original in &descendants {
            let parent = original
                .parent
                .and_then(|p| copies.get(&p))
                .cloned()
                .ok_or_else(|| {
                    TreeError::InvalidParent(format!(
                        "parent of {} was not copied before it",
                        original.id
                    ))
                })?;
            let copy = self.clone_node(
                uow,
                original,
                &parent,
                original.position,
                actor.user,
                duplicated,
            )?;
            apply_grants(uow, copy.id, &grants)?;
            copies.insert(original.id, copy);
        }

        debug!(
            "Copied {} nodes from {} into {}",
            copies.len(),
            source.id,
            destination.id
        );
        Ok(root_copy)
    }

    fn clone_node(
        &self,
        uow: &mut dyn UnitOfWork,
        original: &ResourceNode,
        parent: &ResourceNode,
        position: i64,
        creator: UserId,
        duplicated: &mut Vec<IconRef>,
    ) -> Result<ResourceNode> {
        let icon = self.ctx.icons.duplicate(&original.icon)?;
        if icon.owns_asset() && icon != original.icon {
            duplicated.push(icon.clone());
        }

        let draft = NodeDraft::under(
            parent,
            original.name.clone(),
            original.resource_type.clone(),
            original.kind.clone(),
            icon,
            creator,
        )
        .at_position(position);
        uow.insert(&draft)
    }

    /// Delete `node`, its subtree and every shortcut pointing into it.
    ///
    /// Returns the number of nodes removed.
    pub fn delete(&self, node: NodeId) -> Result<usize> {
        let principal = self.ctx.principal()?;
        let (removed, icons) = self
            .ctx
            .transaction(TxMode::Write, |uow| self.delete_in(uow, principal, node))?;
        self.discard_icons(icons);

        self.ctx
            .record(principal.user, Operation::Delete, Target::Node, node.get());
        Ok(removed)
    }

    fn delete_in(
        &self,
        uow: &mut dyn UnitOfWork,
        principal: Principal,
        node: NodeId,
    ) -> Result<(usize, Vec<IconRef>)> {
        let actor = self.ctx.actor(uow, principal)?;
        let node = uow.find(node)?;
        if node.is_root() {
            return Err(TreeError::RootNode(node.id));
        }
        require(uow, &actor, &node, Capability::Delete, &self.ctx.registry)?;

        let node = uow.lock(&node)?;
        let mut subtree = vec![node.clone()];
        subtree.extend(uow.find_descendants(&node)?);

        let ids: Vec<NodeId> = subtree.iter().map(|n| n.id).collect();
        let outside: Vec<ResourceNode> = uow
            .find_shortcuts_to(&ids)?
            .into_iter()
            .filter(|shortcut| !node.subtree_contains(shortcut))
            .collect();

        // assets are removed once the records are gone for good
        let icons: Vec<IconRef> = subtree
            .iter()
            .chain(&outside)
            .map(|n| n.icon.clone())
            .filter(|icon| icon.owns_asset())
            .collect();

        let mut removed = 0;
        for shortcut in &outside {
            removed += uow.delete_subtree(shortcut)?;
        }
        removed += uow.delete_subtree(&node)?;

        debug!(
            "Deleted {} ({} nodes, {} outside shortcuts)",
            node.id,
            removed,
            outside.len()
        );
        Ok((removed, icons))
    }

    /// Create one shortcut under `destination` per id.
    ///
    /// Each id is resolved to the node it ultimately references, so a
    /// shortcut never points at another shortcut. The shortcut takes the
    /// target's name and type, the shortcut variant of its icon, and the
    /// destination's permission entries.
    pub fn create_shortcuts(
        &self,
        targets: &[NodeId],
        destination: NodeId,
    ) -> Result<BatchReport<ResourceNode>> {
        let principal = self.ctx.principal()?;

        let report = self.batch(targets, |id| {
            let shortcut = self.ctx.transaction(TxMode::Write, |uow| {
                self.shortcut_in(uow, principal, id, destination)
            })?;
            self.ctx.record(
                principal.user,
                Operation::CreateShortcut,
                Target::Node,
                shortcut.id.get(),
            );
            Ok(shortcut)
        })?;

        info!(
            "Created {}/{} shortcuts in {}",
            report.successes().count(),
            report.len(),
            destination
        );
        Ok(report)
    }

    fn shortcut_in(
        &self,
        uow: &mut dyn UnitOfWork,
        principal: Principal,
        id: NodeId,
        destination_id: NodeId,
    ) -> Result<ResourceNode> {
        let registry = &self.ctx.registry;
        let actor = self.ctx.actor(uow, principal)?;
        let destination = destination(uow, destination_id)?;

        let source = uow.find(id)?;
        let target = resolve(uow, source)?;
        require(uow, &actor, &target, Capability::Open, registry)?;
        require(
            uow,
            &actor,
            &destination,
            Capability::Create(target.resource_type.clone()),
            registry,
        )?;

        let shortcut = insert_child(
            uow,
            &destination,
            ResourceName::new(&target.name)?,
            &target.resource_type,
            NodeKind::Shortcut { target: target.id },
            target.icon.shortcut_variant(),
            actor.user,
        )?;
        inherit_from_parent(uow, destination.id, shortcut.id)?;
        Ok(shortcut)
    }

    pub fn move_many(
        &self,
        nodes: &[NodeId],
        new_parent: NodeId,
    ) -> Result<BatchReport<ResourceNode>> {
        self.batch(nodes, |id| self.move_node(id, new_parent))
    }

    pub fn copy_many(
        &self,
        nodes: &[NodeId],
        new_parent: NodeId,
    ) -> Result<BatchReport<ResourceNode>> {
        self.batch(nodes, |id| self.copy(id, new_parent))
    }

    pub fn delete_many(&self, nodes: &[NodeId]) -> Result<BatchReport<usize>> {
        self.batch(nodes, |id| self.delete(id))
    }

    /// Resolve a node for display, recording the access
    pub fn open(&self, node: NodeId) -> Result<ResourceNode> {
        let principal = self.ctx.principal()?;
        let target = self.ctx.transaction(TxMode::Read, |uow| {
            let actor = self.ctx.actor(uow, principal)?;
            let node = uow.find(node)?;
            let target = resolve(uow, node)?;
            require(uow, &actor, &target, Capability::Open, &self.ctx.registry)?;
            Ok(target)
        })?;

        self.ctx
            .record(principal.user, Operation::Open, Target::Node, target.id.get());
        Ok(target)
    }

    fn batch<T, F>(&self, ids: &[NodeId], mut op: F) -> Result<BatchReport<T>>
    where
        F: FnMut(NodeId) -> Result<T>,
    {
        let mut items = Vec::with_capacity(ids.len());
        for &id in ids {
            match op(id) {
                Err(e) if !e.is_recoverable() => return Err(e),
                outcome => {
                    if let Err(e) = &outcome {
                        warn!("Batch item {} failed: {}", id, e);
                    }
                    items.push(BatchItem { id, outcome });
                }
            }
        }
        Ok(BatchReport { items })
    }

    fn discard_icons(&self, icons: impl IntoIterator<Item = IconRef>) {
        for icon in icons {
            if let Err(e) = self.ctx.icons.remove(&icon) {
                warn!("Could not remove icon {}: {}", icon.location, e);
            }
        }
    }
}
