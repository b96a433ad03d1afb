use serde::{Deserialize, Serialize};

use crate::config::{Config, MergeError, ValidationError};

/// How archives are written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct WriteConfig {
    /// Write the primary and the ABI archive at the same time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel: Option<bool>,
}

impl WriteConfig {
    /// Returns true if archives are written concurrently. Defaults to `true`.
    pub fn parallel(&self) -> bool {
        self.parallel.unwrap_or(true)
    }
}

impl Config for WriteConfig {
    fn get_extension_name(&self) -> String {
        "write".to_string()
    }

    fn merge_config(self, other: &Self) -> Result<Self, MergeError> {
        Ok(Self {
            parallel: other.parallel.or(self.parallel),
        })
    }

    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        vec!["parallel".to_string()]
    }
}
