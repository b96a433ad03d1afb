use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::{Config, MergeError, ValidationError};

/// The locations of the archives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ArchiveConfig {
    /// The primary archive holding the complete outputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary: Option<PathBuf>,

    /// The ABI archive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abi: Option<PathBuf>,
}

impl ArchiveConfig {
    /// Resolves relative paths against `dir`.
    pub fn relative_to(self, dir: &Path) -> Self {
        Self {
            primary: self.primary.map(|path| dir.join(path)),
            abi: self.abi.map(|path| dir.join(path)),
        }
    }
}

impl Config for ArchiveConfig {
    fn get_extension_name(&self) -> String {
        "archive".to_string()
    }

    fn merge_config(self, other: &Self) -> Result<Self, MergeError> {
        Ok(Self {
            primary: other.primary.clone().or(self.primary),
            abi: other.abi.clone().or(self.abi),
        })
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.abi.is_some() && self.primary.is_none() {
            return Err(ValidationError::MissingRequiredField(
                "archive.primary".to_string(),
            ));
        }
        if self.primary.is_some() && self.primary == self.abi {
            return Err(ValidationError::InvalidValue(
                "abi".to_string(),
                "the ABI archive must differ from the primary archive".to_string(),
            ));
        }
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        vec!["primary".to_string(), "abi".to_string()]
    }
}
