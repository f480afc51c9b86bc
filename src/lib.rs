//! # Resource Tree - Workspace Resources with Role-Based Rights
//!
//! `resource-tree` keeps the resources of collaborative workspaces in a tree:
//!
//! - **Structural operations**: create, rename, move, deep copy, delete with
//!   cascade, shortcuts that always point at a real node
//! - **Role-based permissions** attached per node and propagated on create,
//!   copy and cross-workspace moves
//! - **Workspace roles**: provisioning, custom roles with their own
//!   directory, user and group memberships
//! - **Listings**: children, ancestors, filtered search, paged role listings
//!
//! Everything is stored in SQLite. Each operation runs in one transaction and
//! is retried transparently when it loses a race with a concurrent writer.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use resource_tree::{NodeMetadata, Principal, ResourceTree, Result, SessionIdentity};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<()> {
//! let session = Arc::new(SessionIdentity::new());
//! let tree = ResourceTree::builder()
//!     .identity(session.clone())
//!     .resource_types(["text"])
//!     .build()?;
//!
//! let owner = tree.access().register_user("jdoe", "John", "Doe")?;
//! session.sign_in(Principal::user(owner.id));
//!
//! let ws = tree.access().provision_workspace("Biology", "BIO")?;
//! let labs = tree.tree().create(ws.root.id, "directory", NodeMetadata::named("Labs"))?;
//! let notes = tree.tree().create(labs.id, "text", NodeMetadata::named("Notes"))?;
//!
//! let copy = tree.tree().copy(labs.id, ws.root.id)?;
//! tree.tree().create_shortcuts(&[notes.id], copy.id)?;
//!
//! for node in tree.query().children(Some(ws.root.id), None)? {
//!     println!("{}", serde_json::to_string(&tree.view(&node))?);
//! }
//! # Ok(())
//! # }
//! ```

pub mod core;

pub use crate::core::{
    access::{AccessEngine, ProvisionedWorkspace, RemovedRole},
    audit::{AuditEntry, AuditLogger, Operation, Target},
    config::TreeConfig,
    context::TreeContext,
    error::{Result, TreeError},
    icon::{DirIconStore, IconRef, IconStore, IconUpload},
    identity::{Actor, IdentityProvider, Principal, SessionIdentity, StaticIdentity},
    ids::{GroupId, NodeId, RoleId, UserId, WorkspaceId},
    node::{NodeKind, NodeMetadata, ResourceNode},
    permission::{Capabilities, Capability, PermissionEntry},
    query::{FilterValue, QueryService, ResourceFilter},
    registry::ResourceTypeRegistry,
    role::{Group, Role, Subject, User, Workspace},
    store::{Page, PageRequest, SqliteStore, Store},
    tree::{BatchItem, BatchReport, TreeEngine},
    view::{NodeView, PropertiesView},
};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

type AuditSink = Box<dyn Fn(&[AuditEntry]) + Send + 'static>;

/// A resource tree with its three engines
///
/// # Examples
///
/// ```rust,no_run
/// use resource_tree::{Principal, ResourceTree, StaticIdentity, UserId};
/// use std::sync::Arc;
///
/// # fn main() -> resource_tree::Result<()> {
/// let tree = ResourceTree::builder()
///     .database_path("/var/lib/restree/tree.db")
///     .identity(Arc::new(StaticIdentity(Principal::admin(UserId(1)))))
///     .build()?;
///
/// for root in tree.query().roots()? {
///     println!("{} ({})", root.name, root.id);
/// }
/// # Ok(())
/// # }
/// ```
pub struct ResourceTree {
    ctx: Arc<TreeContext>,
    tree: TreeEngine,
    access: AccessEngine,
    query: QueryService,
}

impl ResourceTree {
    pub fn builder() -> ResourceTreeBuilder {
        ResourceTreeBuilder::new()
    }

    /// Structural operations (create, move, copy, delete, shortcuts)
    pub fn tree(&self) -> &TreeEngine {
        &self.tree
    }

    /// Workspaces, roles, memberships and rights
    pub fn access(&self) -> &AccessEngine {
        &self.access
    }

    pub fn query(&self) -> &QueryService {
        &self.query
    }

    /// JSON projection of a node, with its icon URL resolved
    pub fn view(&self, node: &ResourceNode) -> NodeView {
        NodeView::new(node, self.ctx.icons.as_ref())
    }

    pub fn views(&self, nodes: &[ResourceNode]) -> Vec<NodeView> {
        nodes.iter().map(|node| self.view(node)).collect()
    }

    /// Audit logger, when auditing is enabled
    pub fn audit(&self) -> Option<&AuditLogger> {
        self.ctx.audit.as_deref()
    }

    pub fn context(&self) -> &Arc<TreeContext> {
        &self.ctx
    }
}

/// Builder for [`ResourceTree`]
///
/// Defaults come from [`TreeConfig::default`]: an in-memory database, icons
/// under `uploads/` and no auditing. An identity provider is required.
pub struct ResourceTreeBuilder {
    config: TreeConfig,
    icons: Option<Arc<dyn IconStore>>,
    identity: Option<Arc<dyn IdentityProvider>>,
    audit_sink: Option<AuditSink>,
}

impl ResourceTreeBuilder {
    pub fn new() -> Self {
        ResourceTreeBuilder {
            config: TreeConfig::default(),
            icons: None,
            identity: None,
            audit_sink: None,
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: TreeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.database.path = Some(path.into());
        self
    }

    /// Register plugin resource types next to `directory` and `file`
    pub fn resource_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config
            .resource_types
            .extend(types.into_iter().map(Into::into));
        self
    }

    /// Icon storage; defaults to a [`DirIconStore`] over the configured root
    pub fn icon_store(mut self, icons: Arc<dyn IconStore>) -> Self {
        self.icons = Some(icons);
        self
    }

    pub fn identity(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Queue audit entries; drain them through [`ResourceTree::audit`]
    pub fn with_audit_logging(mut self) -> Self {
        self.config.audit.enabled = true;
        self
    }

    /// Enable auditing and hand batches of entries to `sink` from a
    /// background thread
    pub fn audit_sink<F>(mut self, sink: F) -> Self
    where
        F: Fn(&[AuditEntry]) + Send + 'static,
    {
        self.config.audit.enabled = true;
        self.audit_sink = Some(Box::new(sink));
        self
    }

    pub fn build(self) -> Result<ResourceTree> {
        let identity = self
            .identity
            .ok_or_else(|| TreeError::Config("identity provider must be set".to_string()))?;
        let config = self.config;

        let store = SqliteStore::from_config(&config.database)?;
        let registry = ResourceTypeRegistry::with_types(&config.resource_types)?;
        let icons = match self.icons {
            Some(icons) => icons,
            None => Arc::new(DirIconStore::new(
                config.icons.root.clone(),
                config.icons.url_prefix.clone(),
            )),
        };

        let audit = if config.audit.enabled {
            let mut logger = AuditLogger::new(
                config.audit.capacity,
                Duration::from_millis(config.audit.flush_interval_ms),
            );
            if let Some(sink) = self.audit_sink {
                logger.start(sink);
            }
            debug!("Audit logging enabled");
            Some(Arc::new(logger))
        } else {
            None
        };

        info!(
            "Building resource tree ({} resource types, database {})",
            registry.names().len(),
            config
                .database
                .path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| ":memory:".to_string())
        );

        let ctx = Arc::new(TreeContext {
            store: Arc::new(store),
            identity,
            registry: Arc::new(registry),
            icons,
            audit,
            max_conflict_retries: config.max_conflict_retries,
            per_page: config.paging.per_page,
        });

        Ok(ResourceTree {
            tree: TreeEngine::new(ctx.clone()),
            access: AccessEngine::new(ctx.clone()),
            query: QueryService::new(ctx.clone()),
            ctx,
        })
    }
}

impl Default for ResourceTreeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
