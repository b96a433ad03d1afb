use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{abi::AbiConfig, archive::ArchiveConfig, write::WriteConfig};

pub mod abi;
pub mod archive;
pub mod write;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Missing required field.
    #[error("missing required field: {0}")]
    MissingRequiredField(String),

    /// Invalid value for a field.
    #[error("invalid value for field {0}: {1}")]
    InvalidValue(String, String),

    /// Invalid configuration for various reasons.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MergeError {
    /// Error merging configurations.
    #[error("error merging configurations: {0}")]
    Error(String),
}

#[derive(Error, Debug)]
pub enum LoadError {
    /// Error merging a configuration file into the previous ones.
    #[error("error merging configuration file {}: {}", .1.display(), .0)]
    MergeError(MergeError, PathBuf),

    /// IO error while reading a configuration file.
    #[error("io error while reading configuration file: {0}")]
    IoError(#[from] std::io::Error),

    /// Error parsing a configuration file.
    #[error("error parsing configuration file: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Error validating the merged configuration.
    #[error("error validating configuration: {0}")]
    ValidationError(#[from] ValidationError),
}

/// A section of the configuration.
pub trait Config:
    Serialize + for<'de> Deserialize<'de> + std::fmt::Debug + Clone + PartialEq + Eq + Default
{
    /// The name of the section.
    fn get_extension_name(&self) -> String;

    /// Merge another configuration (file) into this one.
    /// Note: the "other" configuration takes priority over the current one.
    fn merge_config(self, other: &Self) -> Result<Self, MergeError>;

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ValidationError>;

    fn is_default(&self) -> bool {
        self == &Self::default()
    }

    /// Get the valid keys of the configuration.
    fn keys(&self) -> Vec<String>;
}

/// The complete configuration of a jarcache run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct JarcacheConfig {
    /// Where the archives are written.
    #[serde(default, skip_serializing_if = "ArchiveConfig::is_default")]
    pub archive: ArchiveConfig,

    /// Whether and how the ABI archive is produced.
    #[serde(default, skip_serializing_if = "AbiConfig::is_default")]
    pub abi: AbiConfig,

    /// How archives are written.
    #[serde(default, skip_serializing_if = "WriteConfig::is_default")]
    pub write: WriteConfig,

    /// The files this configuration was loaded from.
    #[serde(skip)]
    pub loaded_from: Vec<PathBuf>,
}

impl JarcacheConfig {
    /// Loads, merges and validates the given files, later files override
    /// earlier ones.
    ///
    /// Relative archive paths are resolved against the directory of the file
    /// they are defined in.
    pub fn load_from_files<I, P>(paths: I) -> Result<Self, LoadError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let config = Self::merge_files(paths)?;
        config.validate()?;
        Ok(config)
    }

    /// Like [`JarcacheConfig::load_from_files`] but without validating the
    /// result, so callers can apply overrides first and validate once.
    pub fn merge_files<I, P>(paths: I) -> Result<Self, LoadError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut config = JarcacheConfig::default();

        for path in paths {
            let path = path.as_ref();
            let content = fs_err::read_to_string(path)?;
            let mut other: JarcacheConfig = toml::from_str(&content)?;
            if let Some(dir) = path.parent() {
                other.archive = other.archive.relative_to(dir);
            }
            other.loaded_from.push(path.to_path_buf());
            tracing::debug!("loaded configuration from {}", path.display());
            config = config
                .merge_config(&other)
                .map_err(|e| LoadError::MergeError(e, path.to_path_buf()))?;
        }

        Ok(config)
    }

    /// Parses a single configuration from a string and validates it.
    pub fn from_toml_str(content: &str) -> Result<Self, LoadError> {
        let config: JarcacheConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Returns the options used when writing archives.
    pub fn write_options(&self) -> jarcache::WriteOptions {
        jarcache::WriteOptions {
            reserved_dirs: self.abi.reserved_dirs(),
            parallel: self.write.parallel(),
        }
    }

    /// Returns where archives are written to, if a primary archive is
    /// configured.
    pub fn archive_targets(&self) -> Option<jarcache::ArchiveTargets> {
        let primary = self.archive.primary.clone()?;
        Some(jarcache::ArchiveTargets {
            primary,
            abi: if self.abi.enabled() {
                self.archive.abi.clone()
            } else {
                None
            },
        })
    }
}

impl Config for JarcacheConfig {
    fn get_extension_name(&self) -> String {
        "base".to_string()
    }

    fn merge_config(self, other: &Self) -> Result<Self, MergeError> {
        Ok(Self {
            archive: self.archive.merge_config(&other.archive)?,
            abi: self.abi.merge_config(&other.abi)?,
            write: self.write.merge_config(&other.write)?,
            loaded_from: self
                .loaded_from
                .iter()
                .chain(&other.loaded_from)
                .cloned()
                .collect(),
        })
    }

    fn validate(&self) -> Result<(), ValidationError> {
        self.archive.validate()?;
        self.abi.validate()?;
        self.write.validate()?;

        if self.abi.enabled() && self.archive.abi.is_none() {
            return Err(ValidationError::MissingRequiredField(
                "archive.abi".to_string(),
            ));
        }
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        fn get_keys(config: &impl Config) -> Vec<String> {
            config
                .keys()
                .iter()
                .map(|s| format!("{}.{}", config.get_extension_name(), s))
                .collect()
        }

        let mut keys = Vec::new();
        keys.extend(get_keys(&self.archive));
        keys.extend(get_keys(&self.abi));
        keys.extend(get_keys(&self.write));
        keys
    }
}
