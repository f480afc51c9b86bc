//! Registered resource types
//!
//! The registry decides which type names may be created and which node kind
//! a type maps to. `directory` and `file` are always present; plugin types
//! (text, activity, ...) are added from configuration.

use crate::core::error::{Result, TreeError};
use crate::core::icon::IconRef;
use crate::core::node::NodeKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DIRECTORY: &str = "directory";
pub const FILE: &str = "file";

/// Reserved for shortcut nodes, never creatable through `create`
pub const SHORTCUT: &str = "shortcut";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceType {
    pub name: String,
    pub default_icon: String,
}

#[derive(Debug, Clone)]
pub struct ResourceTypeRegistry {
    types: BTreeMap<String, ResourceType>,
}

impl ResourceTypeRegistry {
    /// Registry with the built-in `directory` and `file` types
    pub fn new() -> Self {
        let mut registry = ResourceTypeRegistry {
            types: BTreeMap::new(),
        };
        registry.types.insert(DIRECTORY.to_string(), Self::describe(DIRECTORY));
        registry.types.insert(FILE.to_string(), Self::describe(FILE));
        registry
    }

    /// Registry with the built-ins plus the given plugin types
    pub fn with_types<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut registry = Self::new();
        for name in names {
            registry.register(name.as_ref())?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, name: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() || name == SHORTCUT {
            return Err(TreeError::TypeMismatch(format!(
                "'{}' cannot be registered as a resource type",
                name
            )));
        }
        self.types
            .entry(name.to_string())
            .or_insert_with(|| Self::describe(name));
        Ok(())
    }

    fn describe(name: &str) -> ResourceType {
        ResourceType {
            name: name.to_string(),
            default_icon: format!("icons/{}.png", name),
        }
    }

    pub fn get(&self, name: &str) -> Result<&ResourceType> {
        self.types
            .get(name)
            .ok_or_else(|| TreeError::TypeMismatch(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// All registered names, sorted
    pub fn names(&self) -> Vec<String> {
        self.types.keys().cloned().collect()
    }

    pub fn default_icon(&self, name: &str) -> Result<IconRef> {
        Ok(IconRef::default_for(self.get(name)?.default_icon.clone()))
    }

    /// Node kind for a creatable type
    pub fn kind_for(&self, name: &str, mime_type: Option<&str>) -> Result<NodeKind> {
        self.get(name)?;
        Ok(match name {
            DIRECTORY => NodeKind::Directory,
            FILE => NodeKind::File {
                mime_type: mime_type
                    .unwrap_or("application/octet-stream")
                    .to_string(),
            },
            _ => NodeKind::Custom,
        })
    }
}

impl Default for ResourceTypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_present() {
        let registry = ResourceTypeRegistry::new();
        assert!(registry.contains(DIRECTORY));
        assert!(registry.contains(FILE));
        assert_eq!(registry.names(), vec!["directory", "file"]);
    }

    #[test]
    fn test_unknown_type_is_mismatch() {
        let registry = ResourceTypeRegistry::new();
        assert!(matches!(
            registry.get("forum"),
            Err(TreeError::TypeMismatch(_))
        ));
    }

    #[test]
    fn test_shortcut_is_reserved() {
        let mut registry = ResourceTypeRegistry::new();
        assert!(registry.register(SHORTCUT).is_err());
        assert!(registry.register("  ").is_err());
        assert!(registry.kind_for(SHORTCUT, None).is_err());
    }

    #[test]
    fn test_kind_mapping() {
        let registry = ResourceTypeRegistry::with_types(["text"]).unwrap();
        assert_eq!(
            registry.kind_for(DIRECTORY, None).unwrap(),
            NodeKind::Directory
        );
        assert_eq!(
            registry.kind_for(FILE, Some("image/png")).unwrap(),
            NodeKind::File {
                mime_type: "image/png".to_string()
            }
        );
        assert_eq!(registry.kind_for("text", None).unwrap(), NodeKind::Custom);
        assert_eq!(
            registry.default_icon("text").unwrap().location,
            "icons/text.png"
        );
    }
}
