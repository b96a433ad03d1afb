use serde::{Deserialize, Serialize};

use crate::config::{Config, MergeError, ValidationError};

const DEFAULT_RESERVED_DIRS: &[&str] = &["META-INF/"];

/// Configuration of the ABI archive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct AbiConfig {
    /// Produce an ABI archive next to the primary archive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Directories whose classes get no dependency graph node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reserved_dirs: Option<Vec<String>>,
}

impl AbiConfig {
    /// Returns true if an ABI archive is produced. Defaults to `false`.
    pub fn enabled(&self) -> bool {
        self.enabled.unwrap_or(false)
    }

    /// Returns the reserved directories. Defaults to `META-INF/`.
    pub fn reserved_dirs(&self) -> Vec<String> {
        match &self.reserved_dirs {
            Some(dirs) => dirs.clone(),
            None => DEFAULT_RESERVED_DIRS.iter().map(ToString::to_string).collect(),
        }
    }
}

impl Config for AbiConfig {
    fn get_extension_name(&self) -> String {
        "abi".to_string()
    }

    fn merge_config(self, other: &Self) -> Result<Self, MergeError> {
        Ok(Self {
            enabled: other.enabled.or(self.enabled),
            reserved_dirs: other.reserved_dirs.clone().or(self.reserved_dirs),
        })
    }

    fn validate(&self) -> Result<(), ValidationError> {
        for dir in self.reserved_dirs.iter().flatten() {
            if dir.is_empty() || !dir.ends_with('/') {
                return Err(ValidationError::InvalidValue(
                    "reserved-dirs".to_string(),
                    format!("'{dir}' must be a directory ending in '/'"),
                ));
            }
        }
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        vec!["enabled".to_string(), "reserved-dirs".to_string()]
    }
}
