//! Materialized ancestor paths
//!
//! Every node stores the ids of its ancestors, root first and itself last, as
//! a slash-delimited string: `/3/17/42/`. This makes the common tree questions
//! cheap:
//! - ancestors are parsed straight out of the path (one `IN` query, O(depth))
//! - descendants share the path as a prefix (one indexed range query)
//! - cycle detection on move is a containment check, done before any write

use crate::core::error::{Result, TreeError};
use crate::core::ids::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MaterializedPath(String);

impl MaterializedPath {
    /// Path of a workspace root
    pub fn root(id: NodeId) -> Self {
        MaterializedPath(format!("/{}/", id))
    }

    /// Path of a direct child of the node owning this path
    pub fn child(&self, id: NodeId) -> Self {
        MaterializedPath(format!("{}{}/", self.0, id))
    }

    /// Parse and validate a stored path
    pub fn parse(raw: &str) -> Result<Self> {
        if !raw.starts_with('/') || !raw.ends_with('/') || raw.len() < 3 {
            return Err(TreeError::InvalidParent(format!("malformed path '{}'", raw)));
        }
        for segment in raw[1..raw.len() - 1].split('/') {
            if segment.is_empty() || segment.parse::<i64>().is_err() {
                return Err(TreeError::InvalidParent(format!("malformed path '{}'", raw)));
            }
        }
        Ok(MaterializedPath(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Ids from the root down to (and including) the owning node
    pub fn ids(&self) -> Vec<NodeId> {
        self.0
            .split('/')
            .filter(|s| !s.is_empty())
            .filter_map(|s| s.parse::<i64>().ok())
            .map(NodeId)
            .collect()
    }

    /// Number of nodes on the path (a root has depth 1)
    pub fn depth(&self) -> usize {
        self.0.matches('/').count() - 1
    }

    /// Last id on the path
    pub fn leaf(&self) -> Option<NodeId> {
        self.ids().last().copied()
    }

    /// Whether `id` appears anywhere on this path
    pub fn contains(&self, id: NodeId) -> bool {
        let needle = format!("/{}/", id);
        self.0.contains(&needle)
    }

    /// Whether this path lies inside the subtree rooted at `ancestor`
    /// (a path is inside its own subtree)
    pub fn is_within(&self, ancestor: &MaterializedPath) -> bool {
        self.0.starts_with(&ancestor.0)
    }

    /// Re-anchor a path of the subtree `old_prefix` under `new_prefix`
    pub fn rebase(&self, old_prefix: &MaterializedPath, new_prefix: &MaterializedPath) -> Self {
        match self.0.strip_prefix(&old_prefix.0) {
            Some(rest) => MaterializedPath(format!("{}{}", new_prefix.0, rest)),
            None => self.clone(),
        }
    }

    /// Half-open string range `[self, upper)` holding this node and every
    /// descendant path.
    ///
    /// Paths only contain digits and `/`, and `0` sorts right after `/`, so
    /// swapping the trailing slash for `0` bounds the subtree. Range scans
    /// use the path index where a `LIKE` prefix would not.
    pub fn subtree_upper_bound(&self) -> String {
        format!("{}0", &self.0[..self.0.len() - 1])
    }
}

impl fmt::Display for MaterializedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for MaterializedPath {
    type Error = TreeError;

    fn try_from(raw: String) -> Result<Self> {
        MaterializedPath::parse(&raw)
    }
}

impl From<MaterializedPath> for String {
    fn from(path: MaterializedPath) -> String {
        path.0
    }
}
