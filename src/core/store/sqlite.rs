//! SQLite implementation of the repository traits
//!
//! One connection guarded by a mutex; a unit of work holds the guard for its
//! whole lifetime, so units are serialized inside the process and SQLite's
//! own locking serializes them across processes.
//!
//! Subtree queries use the half-open path range `[path, upper)` rather than
//! `LIKE`, which lets SQLite walk `idx_nodes_path`.

use super::{
    MembershipRepository, NodeRepository, NodeSearch, Page, PageRequest, PermissionRepository,
    RoleRepository, Store, TxMode, UnitOfWork,
};
use crate::core::config::DatabaseConfig;
use crate::core::error::{Result, TreeError};
use crate::core::icon::IconRef;
use crate::core::ids::{GroupId, NodeId, RoleId, UserId, WorkspaceId};
use crate::core::node::{NodeDraft, NodeKind, ResourceNode};
use crate::core::path::MaterializedPath;
use crate::core::permission::{Capabilities, PermissionEntry};
use crate::core::role::{Group, Role, Subject, User, Workspace};
use chrono::{TimeZone, Utc};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Params, Row};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS workspaces (
    id INTEGER PRIMARY KEY,
    guid TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    code TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY,
    username TEXT NOT NULL UNIQUE,
    first_name TEXT NOT NULL,
    last_name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS user_groups (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS group_members (
    group_id INTEGER NOT NULL REFERENCES user_groups(id) ON DELETE CASCADE,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    PRIMARY KEY (group_id, user_id)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS roles (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    translation_key TEXT NOT NULL,
    workspace_id INTEGER REFERENCES workspaces(id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_roles_workspace ON roles(workspace_id);

CREATE TABLE IF NOT EXISTS user_roles (
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    role_id INTEGER NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
    PRIMARY KEY (user_id, role_id)
) WITHOUT ROWID;
CREATE INDEX IF NOT EXISTS idx_user_roles_role ON user_roles(role_id);

CREATE TABLE IF NOT EXISTS group_roles (
    group_id INTEGER NOT NULL REFERENCES user_groups(id) ON DELETE CASCADE,
    role_id INTEGER NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
    PRIMARY KEY (group_id, role_id)
) WITHOUT ROWID;
CREATE INDEX IF NOT EXISTS idx_group_roles_role ON group_roles(role_id);

CREATE TABLE IF NOT EXISTS nodes (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    workspace_id INTEGER NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
    parent_id INTEGER REFERENCES nodes(id) ON DELETE CASCADE,
    resource_type TEXT NOT NULL,
    kind INTEGER NOT NULL,
    mime_type TEXT,
    target_id INTEGER REFERENCES nodes(id) ON DELETE CASCADE,
    icon_location TEXT NOT NULL,
    icon_custom INTEGER NOT NULL DEFAULT 0,
    icon_shortcut INTEGER NOT NULL DEFAULT 0,
    creator_id INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    position INTEGER NOT NULL,
    path TEXT NOT NULL,
    version INTEGER NOT NULL DEFAULT 1,
    CHECK ((kind = 2) = (target_id IS NOT NULL))
);
CREATE INDEX IF NOT EXISTS idx_nodes_parent ON nodes(parent_id, position);
CREATE INDEX IF NOT EXISTS idx_nodes_path ON nodes(path);
CREATE INDEX IF NOT EXISTS idx_nodes_target ON nodes(target_id);
CREATE INDEX IF NOT EXISTS idx_nodes_workspace ON nodes(workspace_id);

CREATE TABLE IF NOT EXISTS permissions (
    node_id INTEGER NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
    role_id INTEGER NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
    mask INTEGER NOT NULL,
    creatable TEXT NOT NULL DEFAULT '[]',
    PRIMARY KEY (node_id, role_id)
) WITHOUT ROWID;
CREATE INDEX IF NOT EXISTS idx_permissions_role ON permissions(role_id);
";

const NODE_COLUMNS: &str = "n.id, n.name, n.workspace_id, n.parent_id, n.resource_type, n.kind, \
     n.mime_type, n.target_id, n.icon_location, n.icon_custom, n.icon_shortcut, n.creator_id, \
     n.created_at, n.position, n.path, n.version";

const PERMISSION_COLUMNS: &str = "p.node_id, p.role_id, p.mask, p.creatable";
const ROLE_COLUMNS: &str = "r.id, r.name, r.translation_key, r.workspace_id";
const USER_COLUMNS: &str = "u.id, u.username, u.first_name, u.last_name";

/// Bound parameters per `IN` list, well under SQLite's variable limit
const IN_CHUNK: usize = 500;

/// SQLite-backed store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database file
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        info!("Opened resource tree at {} (journal {})", path.display(), mode);
        Self::init(conn)
    }

    /// Private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    pub fn from_config(config: &DatabaseConfig) -> Result<Self> {
        match &config.path {
            Some(path) => Self::open(path, Duration::from_millis(config.busy_timeout_ms)),
            None => Self::open_in_memory(),
        }
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    /// Run raw SQL outside any unit of work, e.g. to install triggers
    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> Result<()> {
        Ok(self.conn.lock().execute_batch(sql)?)
    }
}

impl Store for SqliteStore {
    fn begin(&self, mode: TxMode) -> Result<Box<dyn UnitOfWork + '_>> {
        let conn = self.conn.lock();
        conn.execute_batch(match mode {
            TxMode::Read => "BEGIN DEFERRED",
            TxMode::Write => "BEGIN IMMEDIATE",
        })?;
        Ok(Box::new(SqliteUnit {
            conn,
            finished: false,
        }))
    }
}

/// Open transaction on the shared connection
struct SqliteUnit<'a> {
    conn: MutexGuard<'a, Connection>,
    finished: bool,
}

impl Drop for SqliteUnit<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                debug!("Rollback failed: {}", e);
            }
        }
    }
}

impl UnitOfWork for SqliteUnit<'_> {
    fn commit(mut self: Box<Self>) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        self.finished = true;
        Ok(())
    }
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn conversion_error(column: usize, err: TreeError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(err))
}

fn node_from_row(row: &Row<'_>) -> rusqlite::Result<ResourceNode> {
    let tag: i64 = row.get(5)?;
    let mime_type: Option<String> = row.get(6)?;
    let target: Option<i64> = row.get(7)?;
    let kind = match (tag, target) {
        (0, _) => NodeKind::Directory,
        (1, _) => NodeKind::File {
            mime_type: mime_type.unwrap_or_default(),
        },
        (2, Some(target)) => NodeKind::Shortcut {
            target: NodeId(target),
        },
        (2, None) => return Err(rusqlite::Error::InvalidColumnType(7, "target_id".into(), Type::Null)),
        (3, _) => NodeKind::Custom,
        (other, _) => return Err(rusqlite::Error::IntegralValueOutOfRange(5, other)),
    };

    let created_us: i64 = row.get(12)?;
    let created_at = Utc
        .timestamp_micros(created_us)
        .single()
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(12, created_us))?;

    let raw_path: String = row.get(14)?;
    let path = MaterializedPath::parse(&raw_path).map_err(|e| conversion_error(14, e))?;

    Ok(ResourceNode {
        id: NodeId(row.get(0)?),
        name: row.get(1)?,
        workspace: WorkspaceId(row.get(2)?),
        parent: row.get::<_, Option<i64>>(3)?.map(NodeId),
        resource_type: row.get(4)?,
        kind,
        icon: IconRef {
            location: row.get(8)?,
            custom: row.get(9)?,
            shortcut: row.get(10)?,
        },
        creator: UserId(row.get(11)?),
        created_at,
        position: row.get(13)?,
        path,
        version: row.get(15)?,
    })
}

fn permission_from_row(row: &Row<'_>) -> rusqlite::Result<PermissionEntry> {
    let mask: i64 = row.get(2)?;
    let raw: String = row.get(3)?;
    let creatable: BTreeSet<String> =
        serde_json::from_str(&raw).map_err(|e| conversion_error(3, e.into()))?;
    Ok(PermissionEntry {
        node: NodeId(row.get(0)?),
        role: RoleId(row.get(1)?),
        capabilities: Capabilities {
            mask: (mask as u8) & Capabilities::ALL,
            creatable,
        },
    })
}

fn role_from_row(row: &Row<'_>) -> rusqlite::Result<Role> {
    Ok(Role {
        id: RoleId(row.get(0)?),
        name: row.get(1)?,
        translation_key: row.get(2)?,
        workspace: row.get::<_, Option<i64>>(3)?.map(WorkspaceId),
    })
}

fn workspace_from_row(row: &Row<'_>) -> rusqlite::Result<Workspace> {
    Ok(Workspace {
        id: WorkspaceId(row.get(0)?),
        guid: row.get(1)?,
        name: row.get(2)?,
        code: row.get(3)?,
    })
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: UserId(row.get(0)?),
        username: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
    })
}

fn group_from_row(row: &Row<'_>) -> rusqlite::Result<Group> {
    Ok(Group {
        id: GroupId(row.get(0)?),
        name: row.get(1)?,
    })
}

fn search_term(search: Option<&str>) -> Option<String> {
    search
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .map(str::to_string)
}

impl SqliteUnit<'_> {
    fn query_nodes<P: Params>(&self, sql: &str, params: P) -> Result<Vec<ResourceNode>> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let nodes = stmt
            .query_map(params, node_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(nodes)
    }

    /// Error for a version-checked write that touched no row
    fn stale(&self, node: &ResourceNode) -> TreeError {
        match self.find(node.id) {
            Ok(current) => TreeError::StorageConflict(format!(
                "node {} is at version {}, expected {}",
                node.id, current.version, node.version
            )),
            Err(e) => e,
        }
    }

    fn bump_version(&mut self, node: &ResourceNode) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE nodes SET version = version + 1 WHERE id = ?1 AND version = ?2",
            params![node.id.0, node.version],
        )?;
        if changed == 0 {
            return Err(self.stale(node));
        }
        Ok(())
    }

    /// Page of rows matching `filter`; `values` binds the filter's `?`s
    fn page_of<T>(
        &self,
        table: &str,
        columns: &str,
        filter: &str,
        order: &str,
        mut values: Vec<Value>,
        page: PageRequest,
        map: fn(&Row<'_>) -> rusqlite::Result<T>,
    ) -> Result<Page<T>> {
        let count_sql = format!("SELECT COUNT(*) FROM {} WHERE {}", table, filter);
        let total: i64 =
            self.conn
                .query_row(&count_sql, params_from_iter(values.iter()), |row| row.get(0))?;

        let select_sql = format!(
            "SELECT {} FROM {} WHERE {} ORDER BY {} LIMIT ? OFFSET ?",
            columns, table, filter, order
        );
        values.push(Value::Integer(page.per_page as i64));
        values.push(Value::Integer(page.offset()));

        let mut stmt = self.conn.prepare(&select_sql)?;
        let items = stmt
            .query_map(params_from_iter(values.iter()), map)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Page {
            items,
            page: page.page,
            per_page: page.per_page,
            total: total as u64,
        })
    }

    fn paged_users(
        &self,
        roles: &[RoleId],
        inside: bool,
        search: Option<&str>,
        page: PageRequest,
    ) -> Result<Page<User>> {
        let mut filter = format!(
            "u.id {}IN (SELECT ur.user_id FROM user_roles ur WHERE ur.role_id IN ({}))",
            if inside { "" } else { "NOT " },
            placeholders(roles.len())
        );
        let mut values: Vec<Value> = roles.iter().map(|r| Value::Integer(r.0)).collect();
        if let Some(term) = search_term(search) {
            filter.push_str(
                " AND instr(lower(u.username || ' ' || u.first_name || ' ' || u.last_name), lower(?)) > 0",
            );
            values.push(Value::Text(term));
        }

        self.page_of(
            "users u",
            USER_COLUMNS,
            &filter,
            "u.last_name, u.first_name, u.id",
            values,
            page,
            user_from_row,
        )
    }

    fn paged_groups(
        &self,
        roles: &[RoleId],
        inside: bool,
        search: Option<&str>,
        page: PageRequest,
    ) -> Result<Page<Group>> {
        let mut filter = format!(
            "g.id {}IN (SELECT gr.group_id FROM group_roles gr WHERE gr.role_id IN ({}))",
            if inside { "" } else { "NOT " },
            placeholders(roles.len())
        );
        let mut values: Vec<Value> = roles.iter().map(|r| Value::Integer(r.0)).collect();
        if let Some(term) = search_term(search) {
            filter.push_str(" AND instr(lower(g.name), lower(?)) > 0");
            values.push(Value::Text(term));
        }

        self.page_of(
            "user_groups g",
            "g.id, g.name",
            &filter,
            "g.name, g.id",
            values,
            page,
            group_from_row,
        )
    }
}

impl NodeRepository for SqliteUnit<'_> {
    fn find(&self, id: NodeId) -> Result<ResourceNode> {
        let sql = format!("SELECT {} FROM nodes n WHERE n.id = ?1", NODE_COLUMNS);
        self.conn
            .prepare_cached(&sql)?
            .query_row(params![id.0], node_from_row)
            .optional()?
            .ok_or_else(|| TreeError::not_found("node", id))
    }

    fn find_roots(&self, user: UserId) -> Result<Vec<ResourceNode>> {
        let sql = format!(
            "SELECT {} FROM nodes n
             WHERE n.parent_id IS NULL AND n.workspace_id IN (
                 SELECT r.workspace_id FROM roles r
                 WHERE r.workspace_id IS NOT NULL AND r.id IN (
                     SELECT ur.role_id FROM user_roles ur WHERE ur.user_id = ?1
                     UNION
                     SELECT gr.role_id FROM group_roles gr
                     JOIN group_members gm ON gm.group_id = gr.group_id
                     WHERE gm.user_id = ?1))
             ORDER BY n.name, n.id",
            NODE_COLUMNS
        );
        self.query_nodes(&sql, params![user.0])
    }

    fn find_all_roots(&self) -> Result<Vec<ResourceNode>> {
        let sql = format!(
            "SELECT {} FROM nodes n WHERE n.parent_id IS NULL ORDER BY n.name, n.id",
            NODE_COLUMNS
        );
        self.query_nodes(&sql, params![])
    }

    fn find_workspace_root(&self, workspace: WorkspaceId) -> Result<ResourceNode> {
        let sql = format!(
            "SELECT {} FROM nodes n WHERE n.parent_id IS NULL AND n.workspace_id = ?1",
            NODE_COLUMNS
        );
        self.query_nodes(&sql, params![workspace.0])?
            .into_iter()
            .next()
            .ok_or_else(|| TreeError::not_found("workspace root", workspace))
    }

    fn find_children(
        &self,
        parent: NodeId,
        type_filter: Option<&str>,
    ) -> Result<Vec<ResourceNode>> {
        let sql = format!(
            "SELECT {} FROM nodes n
             WHERE n.parent_id = ?1 AND (?2 IS NULL OR n.resource_type = ?2)
             ORDER BY n.position, n.id",
            NODE_COLUMNS
        );
        self.query_nodes(&sql, params![parent.0, type_filter])
    }

    fn find_ancestors(&self, node: &ResourceNode) -> Result<Vec<ResourceNode>> {
        let ids = node.path.ids();
        let sql = format!(
            "SELECT {} FROM nodes n WHERE n.id IN ({}) ORDER BY length(n.path)",
            NODE_COLUMNS,
            placeholders(ids.len())
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let nodes = stmt
            .query_map(params_from_iter(ids.iter().map(|id| id.0)), node_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(nodes)
    }

    fn find_descendants(&self, node: &ResourceNode) -> Result<Vec<ResourceNode>> {
        let sql = format!(
            "SELECT {} FROM nodes n WHERE n.path > ?1 AND n.path < ?2 ORDER BY n.path",
            NODE_COLUMNS
        );
        self.query_nodes(
            &sql,
            params![node.path.as_str(), node.path.subtree_upper_bound()],
        )
    }

    fn find_shortcuts_to(&self, targets: &[NodeId]) -> Result<Vec<ResourceNode>> {
        let mut shortcuts = Vec::new();
        for chunk in targets.chunks(IN_CHUNK) {
            let sql = format!(
                "SELECT {} FROM nodes n WHERE n.kind = 2 AND n.target_id IN ({}) ORDER BY n.id",
                NODE_COLUMNS,
                placeholders(chunk.len())
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let found = stmt
                .query_map(params_from_iter(chunk.iter().map(|id| id.0)), node_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            shortcuts.extend(found);
        }
        Ok(shortcuts)
    }

    fn search(&self, search: &NodeSearch) -> Result<Vec<ResourceNode>> {
        let mut sql = format!("SELECT {} FROM nodes n WHERE 1 = 1", NODE_COLUMNS);
        let mut values: Vec<Value> = Vec::new();

        if let Some(name) = &search.name_contains {
            sql.push_str(" AND instr(lower(n.name), lower(?)) > 0");
            values.push(Value::Text(name.clone()));
        }
        if let Some(from) = search.created_from {
            sql.push_str(" AND n.created_at >= ?");
            values.push(Value::Integer(from.timestamp_micros()));
        }
        if let Some(to) = search.created_to {
            sql.push_str(" AND n.created_at <= ?");
            values.push(Value::Integer(to.timestamp_micros()));
        }
        if !search.within.is_empty() {
            let ranges = vec!["(n.path >= ? AND n.path < ?)"; search.within.len()].join(" OR ");
            sql.push_str(&format!(" AND ({})", ranges));
            for path in &search.within {
                values.push(Value::Text(path.as_str().to_string()));
                values.push(Value::Text(path.subtree_upper_bound()));
            }
        }
        if !search.types.is_empty() {
            sql.push_str(&format!(
                " AND n.resource_type IN ({})",
                placeholders(search.types.len())
            ));
            values.extend(search.types.iter().cloned().map(Value::Text));
        }
        if let Some(roles) = &search.visible_to {
            sql.push_str(&format!(
                " AND EXISTS (SELECT 1 FROM permissions p
                   WHERE p.node_id = n.id AND (p.mask & {}) != 0 AND p.role_id IN ({}))",
                Capabilities::OPEN,
                placeholders(roles.len())
            ));
            values.extend(roles.iter().map(|r| Value::Integer(r.0)));
        }
        sql.push_str(" ORDER BY n.name, n.id");

        let mut stmt = self.conn.prepare(&sql)?;
        let nodes = stmt
            .query_map(params_from_iter(values.iter()), node_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(nodes)
    }

    fn next_position(&self, parent: NodeId) -> Result<i64> {
        Ok(self.conn.query_row(
            "SELECT COALESCE(MAX(position), 0) + 1 FROM nodes WHERE parent_id = ?1",
            params![parent.0],
            |row| row.get(0),
        )?)
    }

    fn insert(&mut self, draft: &NodeDraft) -> Result<ResourceNode> {
        let parent_path = match draft.parent {
            Some(parent) => {
                let row: Option<(String, i64)> = self
                    .conn
                    .query_row(
                        "SELECT path, workspace_id FROM nodes WHERE id = ?1",
                        params![parent.0],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?;
                let (path, workspace) = row.ok_or_else(|| {
                    TreeError::InvalidParent(format!("parent {} does not exist", parent))
                })?;
                if workspace != draft.workspace.0 {
                    return Err(TreeError::InvalidParent(format!(
                        "parent {} belongs to workspace {}, not {}",
                        parent, workspace, draft.workspace
                    )));
                }
                Some(MaterializedPath::parse(&path)?)
            }
            None => None,
        };

        let mime_type = match &draft.kind {
            NodeKind::File { mime_type } => Some(mime_type.as_str()),
            _ => None,
        };

        self.conn.execute(
            "INSERT INTO nodes (name, workspace_id, parent_id, resource_type, kind, mime_type,
                                target_id, icon_location, icon_custom, icon_shortcut,
                                creator_id, created_at, position, path, version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, '/0/', 1)",
            params![
                draft.name,
                draft.workspace.0,
                draft.parent.map(|p| p.0),
                draft.resource_type,
                draft.kind.tag(),
                mime_type,
                draft.kind.shortcut_target().map(|t| t.0),
                draft.icon.location,
                draft.icon.custom,
                draft.icon.shortcut,
                draft.creator.0,
                Utc::now().timestamp_micros(),
                draft.position,
            ],
        )?;

        let id = NodeId(self.conn.last_insert_rowid());
        let path = match parent_path {
            Some(parent) => parent.child(id),
            None => MaterializedPath::root(id),
        };
        self.conn.execute(
            "UPDATE nodes SET path = ?1 WHERE id = ?2",
            params![path.as_str(), id.0],
        )?;

        self.find(id)
    }

    fn update(&mut self, node: &ResourceNode) -> Result<ResourceNode> {
        let changed = self.conn.execute(
            "UPDATE nodes
             SET name = ?1, icon_location = ?2, icon_custom = ?3, icon_shortcut = ?4,
                 version = version + 1
             WHERE id = ?5 AND version = ?6",
            params![
                node.name,
                node.icon.location,
                node.icon.custom,
                node.icon.shortcut,
                node.id.0,
                node.version,
            ],
        )?;
        if changed == 0 {
            return Err(self.stale(node));
        }
        self.find(node.id)
    }

    fn lock(&mut self, node: &ResourceNode) -> Result<ResourceNode> {
        self.bump_version(node)?;
        self.find(node.id)
    }

    fn relocate(
        &mut self,
        node: &ResourceNode,
        new_parent: &ResourceNode,
        position: i64,
    ) -> Result<ResourceNode> {
        let changed = self.conn.execute(
            "UPDATE nodes SET parent_id = ?1, position = ?2, version = version + 1
             WHERE id = ?3 AND version = ?4",
            params![new_parent.id.0, position, node.id.0, node.version],
        )?;
        if changed == 0 {
            return Err(self.stale(node));
        }

        let new_path = new_parent.path.child(node.id);
        let rewritten = self.conn.execute(
            "UPDATE nodes SET path = ?1 || substr(path, ?2), workspace_id = ?3
             WHERE path >= ?4 AND path < ?5",
            params![
                new_path.as_str(),
                node.path.as_str().len() as i64 + 1,
                new_parent.workspace.0,
                node.path.as_str(),
                node.path.subtree_upper_bound(),
            ],
        )?;
        debug!(
            "Relocated {} from {} to {} ({} paths rewritten)",
            node.id, node.path, new_path, rewritten
        );

        self.find(node.id)
    }

    fn delete_subtree(&mut self, node: &ResourceNode) -> Result<usize> {
        let lower = node.path.as_str();
        let upper = node.path.subtree_upper_bound();

        // descendants go through the parent_id cascade, which `execute`
        // does not count
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM nodes WHERE path >= ?1 AND path < ?2",
            params![lower, upper],
            |row| row.get(0),
        )?;
        self.conn.execute(
            "DELETE FROM nodes WHERE path >= ?1 AND path < ?2",
            params![lower, upper],
        )?;
        Ok(count as usize)
    }
}

impl PermissionRepository for SqliteUnit<'_> {
    fn permissions_for(&self, node: NodeId) -> Result<Vec<PermissionEntry>> {
        let sql = format!(
            "SELECT {} FROM permissions p WHERE p.node_id = ?1 ORDER BY p.role_id",
            PERMISSION_COLUMNS
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let entries = stmt
            .query_map(params![node.0], permission_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    fn permission(&self, node: NodeId, role: RoleId) -> Result<Option<Capabilities>> {
        let sql = format!(
            "SELECT {} FROM permissions p WHERE p.node_id = ?1 AND p.role_id = ?2",
            PERMISSION_COLUMNS
        );
        let entry = self
            .conn
            .prepare_cached(&sql)?
            .query_row(params![node.0, role.0], permission_from_row)
            .optional()?;
        Ok(entry.map(|e| e.capabilities))
    }

    fn effective(&self, node: NodeId, roles: &[RoleId]) -> Result<Capabilities> {
        if roles.is_empty() {
            return Ok(Capabilities::none());
        }

        let sql = format!(
            "SELECT {} FROM permissions p WHERE p.node_id = ? AND p.role_id IN ({})",
            PERMISSION_COLUMNS,
            placeholders(roles.len())
        );
        let values = std::iter::once(node.0).chain(roles.iter().map(|r| r.0));
        let mut stmt = self.conn.prepare(&sql)?;
        let entries = stmt
            .query_map(params_from_iter(values), permission_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(entries
            .iter()
            .fold(Capabilities::none(), |acc, e| acc.union(&e.capabilities)))
    }

    fn grant(&mut self, node: NodeId, role: RoleId, capabilities: &Capabilities) -> Result<()> {
        let creatable = serde_json::to_string(&capabilities.creatable)?;
        self.conn.execute(
            "INSERT INTO permissions (node_id, role_id, mask, creatable) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(node_id, role_id)
             DO UPDATE SET mask = excluded.mask, creatable = excluded.creatable",
            params![node.0, role.0, capabilities.mask as i64, creatable],
        )?;
        Ok(())
    }

    fn revoke_role(&mut self, role: RoleId) -> Result<usize> {
        Ok(self
            .conn
            .execute("DELETE FROM permissions WHERE role_id = ?1", params![role.0])?)
    }

    fn revoke_foreign_roles(
        &mut self,
        node: &ResourceNode,
        workspace: WorkspaceId,
    ) -> Result<usize> {
        Ok(self.conn.execute(
            "DELETE FROM permissions
             WHERE node_id IN (SELECT id FROM nodes WHERE path >= ?1 AND path < ?2)
               AND role_id IN (SELECT id FROM roles
                               WHERE workspace_id IS NOT NULL AND workspace_id <> ?3)",
            params![
                node.path.as_str(),
                node.path.subtree_upper_bound(),
                workspace.0
            ],
        )?)
    }
}

impl RoleRepository for SqliteUnit<'_> {
    fn create_workspace(&mut self, guid: &str, name: &str, code: &str) -> Result<Workspace> {
        self.conn.execute(
            "INSERT INTO workspaces (guid, name, code) VALUES (?1, ?2, ?3)",
            params![guid, name, code],
        )?;
        Ok(Workspace {
            id: WorkspaceId(self.conn.last_insert_rowid()),
            guid: guid.to_string(),
            name: name.to_string(),
            code: code.to_string(),
        })
    }

    fn find_workspace(&self, id: WorkspaceId) -> Result<Workspace> {
        self.conn
            .query_row(
                "SELECT id, guid, name, code FROM workspaces WHERE id = ?1",
                params![id.0],
                workspace_from_row,
            )
            .optional()?
            .ok_or_else(|| TreeError::not_found("workspace", id))
    }

    fn find_workspace_by_code(&self, code: &str) -> Result<Option<Workspace>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, guid, name, code FROM workspaces WHERE code = ?1",
                params![code],
                workspace_from_row,
            )
            .optional()?)
    }

    fn create_role(
        &mut self,
        name: &str,
        translation_key: &str,
        workspace: Option<WorkspaceId>,
    ) -> Result<Role> {
        self.conn.execute(
            "INSERT INTO roles (name, translation_key, workspace_id) VALUES (?1, ?2, ?3)",
            params![name, translation_key, workspace.map(|w| w.0)],
        )?;
        Ok(Role {
            id: RoleId(self.conn.last_insert_rowid()),
            name: name.to_string(),
            translation_key: translation_key.to_string(),
            workspace,
        })
    }

    fn find_role(&self, id: RoleId) -> Result<Role> {
        let sql = format!("SELECT {} FROM roles r WHERE r.id = ?1", ROLE_COLUMNS);
        self.conn
            .query_row(&sql, params![id.0], role_from_row)
            .optional()?
            .ok_or_else(|| TreeError::not_found("role", id))
    }

    fn find_role_by_name(&self, name: &str) -> Result<Option<Role>> {
        let sql = format!("SELECT {} FROM roles r WHERE r.name = ?1", ROLE_COLUMNS);
        Ok(self
            .conn
            .query_row(&sql, params![name], role_from_row)
            .optional()?)
    }

    fn roles_by_workspace(&self, workspace: WorkspaceId) -> Result<Vec<Role>> {
        let sql = format!(
            "SELECT {} FROM roles r WHERE r.workspace_id = ?1 ORDER BY r.id",
            ROLE_COLUMNS
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let roles = stmt
            .query_map(params![workspace.0], role_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(roles)
    }

    fn update_role(&mut self, role: &Role) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE roles SET name = ?1, translation_key = ?2 WHERE id = ?3",
            params![role.name, role.translation_key, role.id.0],
        )?;
        if changed == 0 {
            return Err(TreeError::not_found("role", role.id));
        }
        Ok(())
    }

    fn delete_role(&mut self, role: RoleId) -> Result<()> {
        let changed = self
            .conn
            .execute("DELETE FROM roles WHERE id = ?1", params![role.0])?;
        if changed == 0 {
            return Err(TreeError::not_found("role", role));
        }
        Ok(())
    }
}

impl MembershipRepository for SqliteUnit<'_> {
    fn create_user(&mut self, username: &str, first_name: &str, last_name: &str) -> Result<User> {
        self.conn.execute(
            "INSERT INTO users (username, first_name, last_name) VALUES (?1, ?2, ?3)",
            params![username, first_name, last_name],
        )?;
        Ok(User {
            id: UserId(self.conn.last_insert_rowid()),
            username: username.to_string(),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
        })
    }

    fn find_user(&self, id: UserId) -> Result<User> {
        let sql = format!("SELECT {} FROM users u WHERE u.id = ?1", USER_COLUMNS);
        self.conn
            .query_row(&sql, params![id.0], user_from_row)
            .optional()?
            .ok_or_else(|| TreeError::not_found("user", id))
    }

    fn create_group(&mut self, name: &str) -> Result<Group> {
        self.conn
            .execute("INSERT INTO user_groups (name) VALUES (?1)", params![name])?;
        Ok(Group {
            id: GroupId(self.conn.last_insert_rowid()),
            name: name.to_string(),
        })
    }

    fn find_group(&self, id: GroupId) -> Result<Group> {
        self.conn
            .query_row(
                "SELECT g.id, g.name FROM user_groups g WHERE g.id = ?1",
                params![id.0],
                group_from_row,
            )
            .optional()?
            .ok_or_else(|| TreeError::not_found("group", id))
    }

    fn add_user_to_group(&mut self, group: GroupId, user: UserId) -> Result<()> {
        self.find_group(group)?;
        self.find_user(user)?;
        self.conn.execute(
            "INSERT OR IGNORE INTO group_members (group_id, user_id) VALUES (?1, ?2)",
            params![group.0, user.0],
        )?;
        Ok(())
    }

    fn associate_role(&mut self, subject: Subject, role: RoleId) -> Result<bool> {
        self.find_role(role)?;
        let inserted = match subject {
            Subject::User(user) => {
                self.find_user(user)?;
                self.conn.execute(
                    "INSERT OR IGNORE INTO user_roles (user_id, role_id) VALUES (?1, ?2)",
                    params![user.0, role.0],
                )?
            }
            Subject::Group(group) => {
                self.find_group(group)?;
                self.conn.execute(
                    "INSERT OR IGNORE INTO group_roles (group_id, role_id) VALUES (?1, ?2)",
                    params![group.0, role.0],
                )?
            }
        };
        Ok(inserted > 0)
    }

    fn dissociate_role(&mut self, subject: Subject, role: RoleId) -> Result<bool> {
        let removed = match subject {
            Subject::User(user) => self.conn.execute(
                "DELETE FROM user_roles WHERE user_id = ?1 AND role_id = ?2",
                params![user.0, role.0],
            )?,
            Subject::Group(group) => self.conn.execute(
                "DELETE FROM group_roles WHERE group_id = ?1 AND role_id = ?2",
                params![group.0, role.0],
            )?,
        };
        Ok(removed > 0)
    }

    fn dissociate_all(&mut self, role: RoleId) -> Result<usize> {
        let users = self
            .conn
            .execute("DELETE FROM user_roles WHERE role_id = ?1", params![role.0])?;
        let groups = self
            .conn
            .execute("DELETE FROM group_roles WHERE role_id = ?1", params![role.0])?;
        Ok(users + groups)
    }

    fn roles_of_user(&self, user: UserId) -> Result<Vec<RoleId>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT ur.role_id FROM user_roles ur WHERE ur.user_id = ?1
             UNION
             SELECT gr.role_id FROM group_roles gr
             JOIN group_members gm ON gm.group_id = gr.group_id
             WHERE gm.user_id = ?1
             ORDER BY 1",
        )?;
        let roles = stmt
            .query_map(params![user.0], |row| row.get::<_, i64>(0).map(RoleId))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(roles)
    }

    fn count_role_users(&self, role: RoleId) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM (
                 SELECT ur.user_id FROM user_roles ur WHERE ur.role_id = ?1
                 UNION
                 SELECT gm.user_id FROM group_members gm
                 JOIN group_roles gr ON gr.group_id = gm.group_id
                 WHERE gr.role_id = ?1)",
            params![role.0],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn users_in_roles(
        &self,
        roles: &[RoleId],
        search: Option<&str>,
        page: PageRequest,
    ) -> Result<Page<User>> {
        self.paged_users(roles, true, search, page)
    }

    fn users_outside_roles(
        &self,
        roles: &[RoleId],
        search: Option<&str>,
        page: PageRequest,
    ) -> Result<Page<User>> {
        self.paged_users(roles, false, search, page)
    }

    fn groups_in_roles(
        &self,
        roles: &[RoleId],
        search: Option<&str>,
        page: PageRequest,
    ) -> Result<Page<Group>> {
        self.paged_groups(roles, true, search, page)
    }

    fn groups_outside_roles(
        &self,
        roles: &[RoleId],
        search: Option<&str>,
        page: PageRequest,
    ) -> Result<Page<Group>> {
        self.paged_groups(roles, false, search, page)
    }
}
