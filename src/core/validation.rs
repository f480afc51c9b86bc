//! Validation for resource names and role labels
//!
//! Resource names are free text shown in the tree; role labels feed the
//! symbolic role name (`ROLE_WS_<LABEL>_<guid>`) and are therefore stricter.

use crate::core::error::{Result, TreeError};
use regex::Regex;
use std::sync::OnceLock;

static LABEL_PATTERN: OnceLock<Regex> = OnceLock::new();

/// Validated resource node name
///
/// # Rules
/// - Surrounding whitespace is trimmed
/// - 1-255 characters
/// - No `/`, `\` or control characters
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceName(String);

impl ResourceName {
    const MAX_LENGTH: usize = 255;

    pub fn new(name: impl AsRef<str>) -> Result<Self> {
        let name = name.as_ref().trim();

        if name.is_empty() {
            return Err(TreeError::InvalidName("name cannot be empty".to_string()));
        }

        if name.chars().count() > Self::MAX_LENGTH {
            return Err(TreeError::InvalidName(format!(
                "name too long (max {} characters)",
                Self::MAX_LENGTH
            )));
        }

        if name
            .chars()
            .any(|c| c == '/' || c == '\\' || c.is_control())
        {
            return Err(TreeError::InvalidName(format!(
                "'{}' contains a path separator or control character",
                name
            )));
        }

        Ok(ResourceName(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl AsRef<str> for ResourceName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Validated workspace role label (the role's translation key)
///
/// # Rules
/// - Starts with a letter or digit
/// - Letters, digits, spaces, `_` and `-` only
/// - 1-64 characters
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoleLabel(String);

impl RoleLabel {
    const PATTERN: &'static str = r"^[\p{L}\p{N}][\p{L}\p{N} _-]*$";
    const MAX_LENGTH: usize = 64;

    pub fn new(label: impl AsRef<str>) -> Result<Self> {
        let label = label.as_ref().trim();

        if label.is_empty() {
            return Err(TreeError::InvalidName(
                "role label cannot be empty".to_string(),
            ));
        }

        if label.chars().count() > Self::MAX_LENGTH {
            return Err(TreeError::InvalidName(format!(
                "role label too long (max {} characters)",
                Self::MAX_LENGTH
            )));
        }

        let re = LABEL_PATTERN
            .get_or_init(|| Regex::new(Self::PATTERN).expect("valid role label pattern"));
        if !re.is_match(label) {
            return Err(TreeError::InvalidName(format!(
                "role label '{}' may only contain letters, digits, spaces, '_' and '-'",
                label
            )));
        }

        Ok(RoleLabel(label.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Upper-cased label with spaces and dashes folded to `_`
    pub fn symbol(&self) -> String {
        self.0
            .to_uppercase()
            .chars()
            .map(|c| if c == ' ' || c == '-' { '_' } else { c })
            .collect()
    }
}

/// Symbolic name of a workspace role
pub fn workspace_role_name(label: &RoleLabel, guid: &str) -> String {
    format!("ROLE_WS_{}_{}", label.symbol(), guid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        assert_eq!(ResourceName::new("  Syllabus  ").unwrap().as_str(), "Syllabus");
        assert!(ResourceName::new("Chapter 1 (draft).pdf").is_ok());
        assert!(ResourceName::new("Études").is_ok());
    }

    #[test]
    fn test_invalid_names() {
        assert!(ResourceName::new("").is_err());
        assert!(ResourceName::new("   ").is_err());
        assert!(ResourceName::new("a/b").is_err());
        assert!(ResourceName::new("a\\b").is_err());
        assert!(ResourceName::new("tab\there").is_err());
        assert!(ResourceName::new("x".repeat(256)).is_err());
        assert!(ResourceName::new("x".repeat(255)).is_ok());
    }

    #[test]
    fn test_role_labels() {
        assert!(RoleLabel::new("student").is_ok());
        assert!(RoleLabel::new("Teaching assistant").is_ok());
        assert!(RoleLabel::new("group-2").is_ok());
        assert!(RoleLabel::new("").is_err());
        assert!(RoleLabel::new("-lead").is_err());
        assert!(RoleLabel::new("a.b").is_err());
        assert!(RoleLabel::new("x".repeat(65)).is_err());
    }

    #[test]
    fn test_role_labels_across_threads() {
        let handles: Vec<_> = (0..4)
            .map(|i| {
                std::thread::spawn(move || {
                    let valid = RoleLabel::new(format!("Group {}", i)).is_ok();
                    let invalid = RoleLabel::new(format!("Group/{}", i)).is_err();
                    valid && invalid
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert!(LABEL_PATTERN.get().is_some());
    }

    #[test]
    fn test_role_name() {
        let label = RoleLabel::new("Teaching assistant").unwrap();
        assert_eq!(label.symbol(), "TEACHING_ASSISTANT");
        assert_eq!(
            workspace_role_name(&label, "abc-123"),
            "ROLE_WS_TEACHING_ASSISTANT_abc-123"
        );
    }
}
