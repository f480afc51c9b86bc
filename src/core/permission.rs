//! Per-role capabilities on resource nodes
//!
//! A permission entry grants one role a capability set on one node. The set is
//! a bitmask of actions plus the list of resource types the role may create
//! below the node.

use crate::core::ids::{NodeId, RoleId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Actions that can be granted on a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Open,
    Edit,
    Copy,
    Delete,
    Export,
    /// Create children of the given resource type
    Create(String),
}

impl Capability {
    fn bit(&self) -> u8 {
        match self {
            Capability::Open => Capabilities::OPEN,
            Capability::Edit => Capabilities::EDIT,
            Capability::Copy => Capabilities::COPY,
            Capability::Delete => Capabilities::DELETE,
            Capability::Export => Capabilities::EXPORT,
            Capability::Create(_) => 0,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Open => f.write_str("open"),
            Capability::Edit => f.write_str("edit"),
            Capability::Copy => f.write_str("copy"),
            Capability::Delete => f.write_str("delete"),
            Capability::Export => f.write_str("export"),
            Capability::Create(kind) => write!(f, "create {}", kind),
        }
    }
}

/// Capability set granted to a role on a node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub mask: u8,
    #[serde(default)]
    pub creatable: BTreeSet<String>,
}

impl Capabilities {
    pub const OPEN: u8 = 1;
    pub const EDIT: u8 = 1 << 1;
    pub const COPY: u8 = 1 << 2;
    pub const DELETE: u8 = 1 << 3;
    pub const EXPORT: u8 = 1 << 4;
    pub const ALL: u8 = Self::OPEN | Self::EDIT | Self::COPY | Self::DELETE | Self::EXPORT;

    pub fn none() -> Self {
        Capabilities::default()
    }

    pub fn from_mask(mask: u8) -> Self {
        Capabilities {
            mask: mask & Self::ALL,
            creatable: BTreeSet::new(),
        }
    }

    /// Every action, creating any of `types`
    pub fn full<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Capabilities::from_mask(Self::ALL).with_creatable(types)
    }

    pub fn with_creatable<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.creatable.extend(types.into_iter().map(Into::into));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.mask == 0 && self.creatable.is_empty()
    }

    pub fn allows(&self, capability: &Capability) -> bool {
        match capability {
            Capability::Create(kind) => self.creatable.contains(kind),
            other => self.mask & other.bit() != 0,
        }
    }

    pub fn union(&self, other: &Capabilities) -> Capabilities {
        Capabilities {
            mask: self.mask | other.mask,
            creatable: self.creatable.union(&other.creatable).cloned().collect(),
        }
    }

    pub fn intersection(&self, other: &Capabilities) -> Capabilities {
        Capabilities {
            mask: self.mask & other.mask,
            creatable: self
                .creatable
                .intersection(&other.creatable)
                .cloned()
                .collect(),
        }
    }
}

/// One row of the permission set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionEntry {
    pub node: NodeId,
    pub role: RoleId,
    pub capabilities: Capabilities,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_checks() {
        let caps = Capabilities::from_mask(Capabilities::OPEN | Capabilities::COPY);
        assert!(caps.allows(&Capability::Open));
        assert!(caps.allows(&Capability::Copy));
        assert!(!caps.allows(&Capability::Edit));
        assert!(!caps.allows(&Capability::Create("file".into())));
    }

    #[test]
    fn test_from_mask_drops_unknown_bits() {
        assert_eq!(Capabilities::from_mask(0xFF).mask, Capabilities::ALL);
    }

    #[test]
    fn test_full_and_creatable() {
        let caps = Capabilities::full(["directory", "file"]);
        assert!(caps.allows(&Capability::Delete));
        assert!(caps.allows(&Capability::Create("file".into())));
        assert!(!caps.allows(&Capability::Create("text".into())));
    }

    #[test]
    fn test_union_and_intersection() {
        let a = Capabilities::from_mask(Capabilities::OPEN).with_creatable(["file"]);
        let b = Capabilities::from_mask(Capabilities::EDIT).with_creatable(["file", "text"]);

        let union = a.union(&b);
        assert_eq!(union.mask, Capabilities::OPEN | Capabilities::EDIT);
        assert_eq!(union.creatable.len(), 2);

        let both = a.intersection(&b);
        assert_eq!(both.mask, 0);
        assert_eq!(both.creatable.into_iter().collect::<Vec<_>>(), vec!["file"]);
    }

    #[test]
    fn test_none_is_empty() {
        assert!(Capabilities::none().is_empty());
        assert!(!Capabilities::from_mask(Capabilities::OPEN).is_empty());
    }
}
