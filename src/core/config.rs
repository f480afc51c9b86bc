//! Service configuration
//!
//! Loaded from TOML; every field has a default so an empty file is valid.
//!
//! ```toml
//! max_conflict_retries = 3
//! resource_types = ["text", "activity"]
//!
//! [database]
//! path = "/var/lib/restree/tree.db"
//! busy_timeout_ms = 5000
//!
//! [icons]
//! root = "/var/www/uploads"
//! url_prefix = "/uploads"
//!
//! [paging]
//! per_page = 20
//!
//! [audit]
//! enabled = true
//! capacity = 4096
//! flush_interval_ms = 1000
//! ```

use crate::core::error::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    pub database: DatabaseConfig,
    pub icons: IconConfig,
    pub paging: PagingConfig,
    pub audit: AuditConfig,

    /// Transparent retries of a mutation hitting a storage conflict
    pub max_conflict_retries: u32,

    /// Plugin resource types registered next to `directory` and `file`
    pub resource_types: Vec<String>,
}

impl Default for TreeConfig {
    fn default() -> Self {
        TreeConfig {
            database: DatabaseConfig::default(),
            icons: IconConfig::default(),
            paging: PagingConfig::default(),
            audit: AuditConfig::default(),
            max_conflict_retries: 3,
            resource_types: Vec::new(),
        }
    }
}

impl TreeConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// None keeps the tree in memory
    pub path: Option<PathBuf>,
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            path: None,
            busy_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IconConfig {
    pub root: PathBuf,
    pub url_prefix: String,
}

impl Default for IconConfig {
    fn default() -> Self {
        IconConfig {
            root: PathBuf::from("uploads"),
            url_prefix: "/uploads".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PagingConfig {
    pub per_page: u32,
}

impl Default for PagingConfig {
    fn default() -> Self {
        PagingConfig { per_page: 20 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub enabled: bool,
    pub capacity: usize,
    pub flush_interval_ms: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        AuditConfig {
            enabled: false,
            capacity: 4096,
            flush_interval_ms: 1000,
        }
    }
}
