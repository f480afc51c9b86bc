//! Resource icons
//!
//! Nodes reference an icon by location. Default icons belong to resource
//! types and are shared; custom icons are uploaded per node and live in the
//! thumbnails directory, so the node owning one is responsible for removing
//! the asset. Shortcuts display the shortcut variant of their target's icon
//! and never own the underlying asset.

use crate::core::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// Reference to an icon asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IconRef {
    /// Location relative to the icon root (e.g. "icons/directory.png")
    pub location: String,

    /// Uploaded for a single node (owned asset)
    pub custom: bool,

    /// Shortcut variant (overlay rendering, never owns the asset)
    pub shortcut: bool,
}

impl IconRef {
    /// Shared default icon of a resource type
    pub fn default_for(location: impl Into<String>) -> Self {
        IconRef {
            location: location.into(),
            custom: false,
            shortcut: false,
        }
    }

    pub fn custom(location: impl Into<String>) -> Self {
        IconRef {
            location: location.into(),
            custom: true,
            shortcut: false,
        }
    }

    pub fn shortcut_variant(&self) -> Self {
        IconRef {
            shortcut: true,
            ..self.clone()
        }
    }

    /// Whether deleting the owning node must remove the asset
    pub fn owns_asset(&self) -> bool {
        self.custom && !self.shortcut
    }
}

/// Icon file uploaded through a properties form
#[derive(Debug, Clone)]
pub struct IconUpload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl IconUpload {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        IconUpload {
            file_name: file_name.into(),
            bytes: bytes.into(),
        }
    }

    fn extension(&self) -> &str {
        Path::new(&self.file_name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("png")
    }
}

/// Icon asset storage consumed by the mutation engine
pub trait IconStore: Send + Sync {
    /// Persist an uploaded icon and return a custom reference to it
    fn create_custom_icon(&self, upload: &IconUpload) -> Result<IconRef>;

    /// Give a copied node its own asset; shared icons are returned unchanged
    fn duplicate(&self, icon: &IconRef) -> Result<IconRef>;

    /// Remove an owned asset; a missing asset is not an error
    fn remove(&self, icon: &IconRef) -> Result<()>;

    /// URL relative to the web root
    fn relative_url(&self, icon: &IconRef) -> String;
}

/// Icon store backed by a thumbnails directory on disk
pub struct DirIconStore {
    root: PathBuf,
    url_prefix: String,
}

impl DirIconStore {
    /// Subdirectory of the root holding custom uploads
    pub const CUSTOM_DIR: &'static str = "thumbnails";

    pub fn new(root: impl Into<PathBuf>, url_prefix: impl Into<String>) -> Self {
        DirIconStore {
            root: root.into(),
            url_prefix: url_prefix.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute location of an asset on disk
    pub fn asset_path(&self, icon: &IconRef) -> PathBuf {
        self.root.join(&icon.location)
    }

    fn fresh_location(extension: &str) -> String {
        format!("{}/{}.{}", Self::CUSTOM_DIR, Uuid::new_v4(), extension)
    }
}

impl IconStore for DirIconStore {
    fn create_custom_icon(&self, upload: &IconUpload) -> Result<IconRef> {
        let location = Self::fresh_location(upload.extension());
        let target = self.root.join(&location);
        if let Some(dir) = target.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&target, &upload.bytes)?;
        debug!("Stored custom icon {} ({} bytes)", location, upload.bytes.len());
        Ok(IconRef::custom(location))
    }

    fn duplicate(&self, icon: &IconRef) -> Result<IconRef> {
        if !icon.owns_asset() {
            return Ok(icon.clone());
        }

        let extension = Path::new(&icon.location)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("png")
            .to_string();
        let location = Self::fresh_location(&extension);
        let target = self.root.join(&location);
        if let Some(dir) = target.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::copy(self.asset_path(icon), &target)?;
        Ok(IconRef::custom(location))
    }

    fn remove(&self, icon: &IconRef) -> Result<()> {
        if !icon.owns_asset() {
            return Ok(());
        }
        match fs::remove_file(self.asset_path(icon)) {
            Ok(()) => {
                debug!("Removed custom icon {}", icon.location);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn relative_url(&self, icon: &IconRef) -> String {
        if icon.shortcut {
            format!("{}/shortcut/{}", self.url_prefix, icon.location)
        } else {
            format!("{}/{}", self.url_prefix, icon.location)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_custom_icon_lifecycle() {
        let dir = TempDir::new().unwrap();
        let store = DirIconStore::new(dir.path(), "/uploads");

        let icon = store
            .create_custom_icon(&IconUpload::new("logo.jpg", b"jpeg".to_vec()))
            .unwrap();
        assert!(icon.custom);
        assert!(icon.location.starts_with("thumbnails/"));
        assert!(icon.location.ends_with(".jpg"));
        assert!(store.asset_path(&icon).exists());

        store.remove(&icon).unwrap();
        assert!(!store.asset_path(&icon).exists());

        // Removing twice is fine
        store.remove(&icon).unwrap();
    }

    #[test]
    fn test_shortcut_variant_never_removes_asset() {
        let dir = TempDir::new().unwrap();
        let store = DirIconStore::new(dir.path(), "/uploads");

        let icon = store
            .create_custom_icon(&IconUpload::new("logo.png", b"png".to_vec()))
            .unwrap();
        let variant = icon.shortcut_variant();

        store.remove(&variant).unwrap();
        assert!(store.asset_path(&icon).exists());
    }

    #[test]
    fn test_duplicate_creates_independent_asset() {
        let dir = TempDir::new().unwrap();
        let store = DirIconStore::new(dir.path(), "/uploads");

        let icon = store
            .create_custom_icon(&IconUpload::new("a.png", b"pixels".to_vec()))
            .unwrap();
        let copy = store.duplicate(&icon).unwrap();
        assert_ne!(copy.location, icon.location);

        store.remove(&icon).unwrap();
        assert_eq!(fs::read(store.asset_path(&copy)).unwrap(), b"pixels");

        let shared = IconRef::default_for("icons/file.png");
        assert_eq!(store.duplicate(&shared).unwrap(), shared);
    }

    #[test]
    fn test_relative_url() {
        let store = DirIconStore::new("/var/www", "/uploads/");
        let icon = IconRef::default_for("icons/directory.png");

        assert_eq!(store.relative_url(&icon), "/uploads/icons/directory.png");
        assert_eq!(
            store.relative_url(&icon.shortcut_variant()),
            "/uploads/shortcut/icons/directory.png"
        );
    }
}
