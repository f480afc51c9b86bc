//! Read side of the tree
//!
//! Node listings only return nodes the acting user may open. Role and group
//! listings are paged and reserved to the managers of the workspace the
//! roles belong to.

use crate::core::access::{require, require_manager, require_role_manager, rights};
use crate::core::context::TreeContext;
use crate::core::error::{Result, TreeError};
use crate::core::identity::Actor;
use crate::core::ids::{NodeId, RoleId, WorkspaceId};
use crate::core::node::ResourceNode;
use crate::core::permission::Capability;
use crate::core::role::{Group, Role, User};
use crate::core::store::{NodeSearch, Page, PageRequest, TxMode, UnitOfWork};
use crate::core::tree::resolve;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Raw value of a filter criterion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Text(String),
    List(Vec<String>),
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::Text(value.to_string())
    }
}

impl From<Vec<&str>> for FilterValue {
    fn from(values: Vec<&str>) -> Self {
        FilterValue::List(values.into_iter().map(str::to_string).collect())
    }
}

/// Parsed search criteria
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceFilter {
    pub name: Option<String>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    /// Subtrees to search in (empty = everywhere)
    pub roots: Vec<NodeId>,
    pub types: Vec<String>,
}

#[derive(Clone, Copy)]
enum DayBound {
    Start,
    End,
}

/// `YYYY-MM-DD` (start or end of that day) or an RFC 3339 timestamp
fn parse_date(raw: &str, bound: DayBound) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
        return Some(instant.with_timezone(&Utc));
    }

    let day = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
    let time: Option<NaiveDateTime> = match bound {
        DayBound::Start => day.and_hms_opt(0, 0, 0),
        DayBound::End => day.and_hms_micro_opt(23, 59, 59, 999_999),
    };
    time.map(|t| Utc.from_utc_datetime(&t))
}

impl ResourceFilter {
    /// Keep the known criteria of a request.
    ///
    /// Unknown keys, values of the wrong shape and dates that do not parse
    /// are dropped.
    pub fn from_params(params: &BTreeMap<String, FilterValue>) -> Self {
        let mut filter = ResourceFilter::default();

        for (key, value) in params {
            match (key.as_str(), value) {
                ("name", FilterValue::Text(name)) => {
                    let name = name.trim();
                    if !name.is_empty() {
                        filter.name = Some(name.to_string());
                    }
                }
                ("dateFrom", FilterValue::Text(raw)) => match parse_date(raw, DayBound::Start) {
                    Some(date) => filter.date_from = Some(date),
                    None => warn!("Ignoring unparsable dateFrom '{}'", raw),
                },
                ("dateTo", FilterValue::Text(raw)) => match parse_date(raw, DayBound::End) {
                    Some(date) => filter.date_to = Some(date),
                    None => warn!("Ignoring unparsable dateTo '{}'", raw),
                },
                ("roots", FilterValue::List(ids)) => {
                    for id in ids {
                        match id.trim().parse::<i64>() {
                            Ok(id) => filter.roots.push(NodeId(id)),
                            Err(_) => warn!("Ignoring root id '{}'", id),
                        }
                    }
                }
                ("types", FilterValue::List(types)) => {
                    filter.types.extend(
                        types
                            .iter()
                            .map(|t| t.trim())
                            .filter(|t| !t.is_empty())
                            .map(str::to_string),
                    );
                }
                _ => warn!("Ignoring filter criterion '{}'", key),
            }
        }

        filter
    }

    pub fn is_empty(&self) -> bool {
        *self == ResourceFilter::default()
    }
}

/// Roles of `all` that are not in `selected`
fn role_difference(all: &[Role], selected: &[RoleId]) -> Vec<RoleId> {
    let selected: BTreeSet<RoleId> = selected.iter().copied().collect();
    all.iter()
        .map(|role| role.id)
        .filter(|id| !selected.contains(id))
        .collect()
}

/// Listings over the tree, roles and memberships
pub struct QueryService {
    ctx: Arc<TreeContext>,
}

impl QueryService {
    pub fn new(ctx: Arc<TreeContext>) -> Self {
        QueryService { ctx }
    }

    /// Page request using the configured page size
    pub fn page(&self, page: u32) -> PageRequest {
        PageRequest::new(page, self.ctx.per_page)
    }

    fn can_open(&self, uow: &dyn UnitOfWork, actor: &Actor, node: &ResourceNode) -> Result<bool> {
        Ok(rights(uow, actor, node.id, &self.ctx.registry)?.allows(&Capability::Open))
    }

    fn visible(
        &self,
        uow: &dyn UnitOfWork,
        actor: &Actor,
        nodes: Vec<ResourceNode>,
    ) -> Result<Vec<ResourceNode>> {
        let mut kept = Vec::with_capacity(nodes.len());
        for node in nodes {
            if self.can_open(uow, actor, &node)? {
                kept.push(node);
            }
        }
        Ok(kept)
    }

    /// Workspace roots reachable by the acting user, ordered by name
    pub fn roots(&self) -> Result<Vec<ResourceNode>> {
        let principal = self.ctx.principal()?;
        self.ctx.transaction(TxMode::Read, |uow| {
            if principal.admin {
                uow.find_all_roots()
            } else {
                uow.find_roots(principal.user)
            }
        })
    }

    pub fn workspace_root(&self, workspace: WorkspaceId) -> Result<ResourceNode> {
        let principal = self.ctx.principal()?;
        self.ctx.transaction(TxMode::Read, |uow| {
            let actor = self.ctx.actor(uow, principal)?;
            let root = uow.find_workspace_root(workspace)?;
            require(uow, &actor, &root, Capability::Open, &self.ctx.registry)?;
            Ok(root)
        })
    }

    /// Children of `parent` the actor may open, in sibling order.
    ///
    /// Without a parent the workspace roots are listed. A shortcut parent
    /// lists the children of its target.
    pub fn children(
        &self,
        parent: Option<NodeId>,
        type_filter: Option<&str>,
    ) -> Result<Vec<ResourceNode>> {
        let Some(parent) = parent else {
            let roots = self.roots()?;
            return Ok(roots
                .into_iter()
                .filter(|root| type_filter.map_or(true, |t| root.resource_type == t))
                .collect());
        };

        let principal = self.ctx.principal()?;
        self.ctx.transaction(TxMode::Read, |uow| {
            let actor = self.ctx.actor(uow, principal)?;
            let node = uow.find(parent)?;
            let parent = resolve(uow, node)?;
            let children = uow.find_children(parent.id, type_filter)?;
            self.visible(uow, &actor, children)
        })
    }

    /// Root first, `node` last; empty without a node
    pub fn ancestors(&self, node: Option<NodeId>) -> Result<Vec<ResourceNode>> {
        let Some(node) = node else {
            return Ok(Vec::new());
        };

        let principal = self.ctx.principal()?;
        self.ctx.transaction(TxMode::Read, |uow| {
            let actor = self.ctx.actor(uow, principal)?;
            let node = uow.find(node)?;
            require(uow, &actor, &node, Capability::Open, &self.ctx.registry)?;
            uow.find_ancestors(&node)
        })
    }

    /// Descendants of `root` having type `resource_type`, parents first
    pub fn descendants_of_type(
        &self,
        root: NodeId,
        resource_type: &str,
    ) -> Result<Vec<ResourceNode>> {
        let principal = self.ctx.principal()?;
        self.ctx.transaction(TxMode::Read, |uow| {
            let actor = self.ctx.actor(uow, principal)?;
            let root = uow.find(root)?;
            let root = resolve(uow, root)?;
            let matching = uow
                .find_descendants(&root)?
                .into_iter()
                .filter(|node| node.resource_type == resource_type)
                .collect();
            self.visible(uow, &actor, matching)
        })
    }

    /// Every node the acting user may open, ordered by name
    pub fn visible_resources(&self) -> Result<Vec<ResourceNode>> {
        self.filter(&ResourceFilter::default())
    }

    /// Nodes matching `filter` that the acting user may open, ordered by name
    pub fn filter(&self, filter: &ResourceFilter) -> Result<Vec<ResourceNode>> {
        let principal = self.ctx.principal()?;
        let found = self.ctx.transaction(TxMode::Read, |uow| {
            let actor = self.ctx.actor(uow, principal)?;
            if !actor.admin && actor.roles.is_empty() {
                return Ok(Vec::new());
            }

            let mut within = Vec::with_capacity(filter.roots.len());
            for id in &filter.roots {
                match uow.find(*id) {
                    Ok(root) => within.push(root.path),
                    Err(TreeError::NotFound { .. }) => {
                        warn!("Ignoring filter root {}: no such node", id);
                    }
                    Err(e) => return Err(e),
                }
            }
            // only stale roots were given: nothing lies below them
            if !filter.roots.is_empty() && within.is_empty() {
                return Ok(Vec::new());
            }

            let search = NodeSearch {
                name_contains: filter.name.clone(),
                created_from: filter.date_from,
                created_to: filter.date_to,
                within,
                types: filter.types.clone(),
                visible_to: if actor.admin {
                    None
                } else {
                    Some(actor.roles.clone())
                },
            };
            uow.search(&search)
        })?;

        debug!("Filter matched {} nodes", found.len());
        Ok(found)
    }

    /// Users holding `role` directly
    pub fn users_by_role(
        &self,
        role: RoleId,
        search: Option<&str>,
        page: PageRequest,
    ) -> Result<Page<User>> {
        self.role_listing(role, |uow, role| uow.users_in_roles(&[role.id], search, page))
    }

    pub fn users_outside_role(
        &self,
        role: RoleId,
        search: Option<&str>,
        page: PageRequest,
    ) -> Result<Page<User>> {
        self.role_listing(role, |uow, role| {
            uow.users_outside_roles(&[role.id], search, page)
        })
    }

    pub fn groups_by_role(
        &self,
        role: RoleId,
        search: Option<&str>,
        page: PageRequest,
    ) -> Result<Page<Group>> {
        self.role_listing(role, |uow, role| uow.groups_in_roles(&[role.id], search, page))
    }

    pub fn groups_outside_role(
        &self,
        role: RoleId,
        search: Option<&str>,
        page: PageRequest,
    ) -> Result<Page<Group>> {
        self.role_listing(role, |uow, role| {
            uow.groups_outside_roles(&[role.id], search, page)
        })
    }

    fn role_listing<T, F>(&self, role: RoleId, list: F) -> Result<Page<T>>
    where
        F: Fn(&dyn UnitOfWork, &Role) -> Result<Page<T>>,
    {
        let principal = self.ctx.principal()?;
        self.ctx.transaction(TxMode::Read, |uow| {
            let actor = self.ctx.actor(uow, principal)?;
            let role = uow.find_role(role)?;
            require_role_manager(uow, &actor, &role)?;
            list(uow, &role)
        })
    }

    /// Users registered in a workspace.
    ///
    /// `selected` narrows the roles considered (empty = every workspace
    /// role). With `with_unregistered`, the listing instead returns users
    /// holding none of the workspace roles left out of the selection.
    pub fn registered_users(
        &self,
        workspace: WorkspaceId,
        selected: &[RoleId],
        search: Option<&str>,
        with_unregistered: bool,
        page: PageRequest,
    ) -> Result<Page<User>> {
        let principal = self.ctx.principal()?;
        self.ctx.transaction(TxMode::Read, |uow| {
            let actor = self.ctx.actor(uow, principal)?;
            let workspace = uow.find_workspace(workspace)?;
            require_manager(uow, &actor, &workspace)?;

            let roles = uow.roles_by_workspace(workspace.id)?;
            let selection: Vec<RoleId> = if selected.is_empty() {
                roles.iter().map(|role| role.id).collect()
            } else {
                roles
                    .iter()
                    .map(|role| role.id)
                    .filter(|id| selected.contains(id))
                    .collect()
            };

            if with_unregistered {
                uow.users_outside_roles(&role_difference(&roles, &selection), search, page)
            } else {
                uow.users_in_roles(&selection, search, page)
            }
        })
    }

    /// Groups holding any role of the workspace
    pub fn registered_groups(
        &self,
        workspace: WorkspaceId,
        search: Option<&str>,
        page: PageRequest,
    ) -> Result<Page<Group>> {
        let principal = self.ctx.principal()?;
        self.ctx.transaction(TxMode::Read, |uow| {
            let actor = self.ctx.actor(uow, principal)?;
            let workspace = uow.find_workspace(workspace)?;
            require_manager(uow, &actor, &workspace)?;

            let roles: Vec<RoleId> = uow
                .roles_by_workspace(workspace.id)?
                .iter()
                .map(|role| role.id)
                .collect();
            uow.groups_in_roles(&roles, search, page)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::TreeError;
    use crate::core::node::NodeMetadata;
    use crate::core::testing::Fixture;
    use chrono::{Datelike, Timelike};

    fn params(pairs: Vec<(&str, FilterValue)>) -> BTreeMap<String, FilterValue> {
        pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    #[test]
    fn test_filter_params_allow_list() {
        let filter = ResourceFilter::from_params(&params(vec![
            ("name", "  syl ".into()),
            ("dateFrom", "2024-03-01".into()),
            ("dateTo", "2024-03-31".into()),
            ("roots", vec!["4", "x", "9"].into()),
            ("types", vec!["text", " "].into()),
            ("owner", "someone".into()),
        ]));

        assert_eq!(filter.name.as_deref(), Some("syl"));
        assert_eq!(filter.roots, vec![NodeId(4), NodeId(9)]);
        assert_eq!(filter.types, vec!["text"]);

        let from = filter.date_from.unwrap();
        assert_eq!((from.day(), from.hour()), (1, 0));
        let to = filter.date_to.unwrap();
        assert_eq!((to.day(), to.hour(), to.minute()), (31, 23, 59));
    }

    #[test]
    fn test_filter_drops_wrong_shapes() {
        let filter = ResourceFilter::from_params(&params(vec![
            ("name", vec!["a", "b"].into()),
            ("dateFrom", "yesterday".into()),
            ("roots", "4".into()),
        ]));
        assert!(filter.is_empty());

        let filter = ResourceFilter::from_params(&params(vec![(
            "dateFrom",
            "2024-03-01T10:30:00+02:00".into(),
        )]));
        assert_eq!(filter.date_from.unwrap().hour(), 8);
    }

    #[test]
    fn test_filter_value_from_json() {
        let raw: BTreeMap<String, FilterValue> =
            serde_json::from_str(r#"{"name": "lab", "types": ["text", "file"]}"#).unwrap();
        let filter = ResourceFilter::from_params(&raw);
        assert_eq!(filter.name.as_deref(), Some("lab"));
        assert_eq!(filter.types, vec!["text", "file"]);
    }

    #[test]
    fn test_role_difference() {
        let role = |id| Role {
            id: RoleId(id),
            name: format!("ROLE_{}", id),
            translation_key: "r".to_string(),
            workspace: Some(WorkspaceId(1)),
        };
        let all = vec![role(1), role(2), role(3)];

        assert_eq!(role_difference(&all, &[RoleId(2)]), vec![RoleId(1), RoleId(3)]);
        assert!(role_difference(&all, &[RoleId(1), RoleId(2), RoleId(3)]).is_empty());
    }

    #[test]
    fn test_children_without_parent_lists_roots() {
        let fx = Fixture::new();
        let bio = fx.workspace("owner", "Biology", "BIO");
        fx.access.provision_workspace("Anatomy", "ANA").unwrap();

        let names: Vec<String> = fx
            .query
            .children(None, None)
            .unwrap()
            .into_iter()
            .map(|n| n.name)
            .collect();
        assert_eq!(names, vec!["Anatomy", "Biology"]);
        assert!(fx.query.ancestors(None).unwrap().is_empty());
        assert_eq!(fx.query.workspace_root(bio.workspace.id).unwrap().id, bio.root.id);
    }

    #[test]
    fn test_children_hide_unopenable_nodes() {
        let fx = Fixture::new();
        let ws = fx.workspace("owner", "Biology", "BIO");
        let public = fx.mkdir(ws.root.id, "Public");
        let private = fx.mkdir(ws.root.id, "Private");
        fx.access
            .grant(
                private.id,
                ws.visitor.id,
                crate::core::permission::Capabilities::none(),
            )
            .unwrap();

        let visitor = fx.user("visitor");
        fx.access
            .associate_roles(&[visitor.id], &[ws.visitor.id])
            .unwrap();

        fx.sign_in(visitor.id);
        let visible: Vec<NodeId> = fx
            .query
            .children(Some(ws.root.id), None)
            .unwrap()
            .iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(visible, vec![public.id]);
        assert!(matches!(
            fx.query.ancestors(Some(private.id)),
            Err(TreeError::PermissionDenied(_))
        ));
    }

    #[test]
    fn test_filter_by_name_type_and_subtree() {
        let fx = Fixture::new();
        let ws = fx.workspace("owner", "Biology", "BIO");
        let labs = fx.mkdir(ws.root.id, "Labs");
        fx.tree
            .create(labs.id, "text", NodeMetadata::named("Lab syllabus"))
            .unwrap();
        fx.tree
            .create(ws.root.id, "text", NodeMetadata::named("Course syllabus"))
            .unwrap();

        let filter = ResourceFilter {
            name: Some("SYLLABUS".to_string()),
            roots: vec![labs.id],
            types: vec!["text".to_string()],
            ..ResourceFilter::default()
        };
        let names: Vec<String> = fx
            .query
            .filter(&filter)
            .unwrap()
            .into_iter()
            .map(|n| n.name)
            .collect();
        assert_eq!(names, vec!["Lab syllabus"]);

        let all = fx.query.visible_resources().unwrap();
        assert_eq!(all.len(), 4);

        let stranger = fx.user("stranger");
        fx.sign_in(stranger.id);
        assert!(fx.query.visible_resources().unwrap().is_empty());
    }

    #[test]
    fn test_filter_skips_stale_roots() {
        let fx = Fixture::new();
        let ws = fx.workspace("owner", "Biology", "BIO");
        let labs = fx.mkdir(ws.root.id, "Labs");
        fx.tree
            .create(labs.id, "text", NodeMetadata::named("Lab syllabus"))
            .unwrap();
        fx.tree
            .create(ws.root.id, "text", NodeMetadata::named("Course syllabus"))
            .unwrap();

        let mut filter = ResourceFilter {
            types: vec!["text".to_string()],
            roots: vec![NodeId(9999), labs.id],
            ..ResourceFilter::default()
        };
        let names: Vec<String> = fx
            .query
            .filter(&filter)
            .unwrap()
            .into_iter()
            .map(|n| n.name)
            .collect();
        assert_eq!(names, vec!["Lab syllabus"]);

        // a filter scoped only to missing roots matches nothing
        filter.roots = vec![NodeId(9999)];
        assert!(fx.query.filter(&filter).unwrap().is_empty());
    }

    #[test]
    fn test_descendants_of_type() {
        let fx = Fixture::new();
        let ws = fx.workspace("owner", "Biology", "BIO");
        let labs = fx.mkdir(ws.root.id, "Labs");
        fx.mkdir(labs.id, "Week 1");
        fx.tree
            .create(labs.id, "text", NodeMetadata::named("Notes"))
            .unwrap();

        let dirs = fx.query.descendants_of_type(ws.root.id, "directory").unwrap();
        let names: Vec<&str> = dirs.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["Labs", "Week 1"]);
    }

    #[test]
    fn test_registered_users_listing() {
        let fx = Fixture::new();
        let ws = fx.workspace("owner", "Biology", "BIO");
        let alice = fx.user("alice");
        let bob = fx.user("bob");
        fx.user("carol");
        fx.access
            .associate_roles(&[alice.id], &[ws.collaborator.id])
            .unwrap();
        fx.access.associate_roles(&[bob.id], &[ws.visitor.id]).unwrap();

        let all = fx
            .query
            .registered_users(ws.workspace.id, &[], None, false, fx.query.page(1))
            .unwrap();
        assert_eq!(all.total, 3);

        let visitors = fx
            .query
            .registered_users(ws.workspace.id, &[ws.visitor.id], None, false, fx.query.page(1))
            .unwrap();
        assert_eq!(visitors.items, vec![bob.clone()]);

        // not holding manager or collaborator
        let outside = fx
            .query
            .registered_users(ws.workspace.id, &[ws.visitor.id], None, true, fx.query.page(1))
            .unwrap();
        let usernames: Vec<&str> = outside.items.iter().map(|u| u.username.as_str()).collect();
        assert_eq!(usernames, vec!["bob", "carol"]);

        let searched = fx
            .query
            .users_outside_role(ws.manager.id, Some("car"), fx.query.page(1))
            .unwrap();
        assert_eq!(searched.total, 1);

        fx.sign_in(alice.id);
        assert!(matches!(
            fx.query.users_by_role(ws.visitor.id, None, fx.query.page(1)),
            Err(TreeError::PermissionDenied(_))
        ));
    }

    #[test]
    fn test_group_listings() {
        let fx = Fixture::new();
        let ws = fx.workspace("owner", "Biology", "BIO");
        let owner = fx.session_user();
        fx.sign_in_admin(owner);
        let lab = fx.access.register_group("Lab").unwrap();
        let choir = fx.access.register_group("Choir").unwrap();
        fx.access.add_role_to_groups(ws.visitor.id, &[lab.id]).unwrap();
        fx.sign_in(owner);

        let holding = fx
            .query
            .groups_by_role(ws.visitor.id, None, fx.query.page(1))
            .unwrap();
        assert_eq!(holding.items, vec![lab.clone()]);

        let outside = fx
            .query
            .groups_outside_role(ws.visitor.id, None, fx.query.page(1))
            .unwrap();
        assert_eq!(outside.items, vec![choir]);

        let registered = fx
            .query
            .registered_groups(ws.workspace.id, Some("la"), fx.query.page(1))
            .unwrap();
        assert_eq!(registered.items, vec![lab]);
    }
}
