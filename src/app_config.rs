//! Module for application configuration settings.
//!
//! User configurations may be specified in a configuration file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

fn cachedfs_cache_dir() -> Option<PathBuf> {
    if let Some(path) = dirs::cache_dir() {
        return Some(path.join("cachedfs"));
    }

    dirs::home_dir().map(|home| home.join(".cache").join("cachedfs"))
}

fn default_snapshot_path() -> PathBuf {
    cachedfs_cache_dir().map_or_else(
        || PathBuf::from("/tmp/cachedfs/metadata.json"),
        |dir| dir.join("metadata.json"),
    )
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_autosave() -> bool {
    true
}

/// The metadata cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CacheConfig {
    /// Where the metadata snapshot is persisted.
    #[serde(default = "default_snapshot_path")]
    pub path: PathBuf,

    /// Discard saved snapshots older than this many seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_after_secs: Option<u64>,

    /// Save the snapshot after every mutation.
    #[serde(default = "default_autosave")]
    pub autosave: bool,
}

impl CacheConfig {
    /// The configured snapshot lifetime.
    pub fn expire_after(&self) -> Option<Duration> {
        self.expire_after_secs.map(Duration::from_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: default_snapshot_path(),
            expire_after_secs: None,
            autosave: default_autosave(),
        }
    }
}

/// Application configuration structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// The directory the local adapter serves.
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// The metadata cache settings.
    #[serde(default)]
    pub cache: CacheConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: default_root(),
            cache: CacheConfig::default(),
        }
    }
}

/// Errors raised while loading the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file is not valid TOML for [`Config`].
    #[error("Deserialization error: {0}")]
    DeserializationError(#[from] toml::de::Error),

    /// The configuration file could not be read.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl Config {
    /// Validate the correctness of the configuration.
    ///
    /// Returns:
    /// - `Ok(())` if the configuration is valid.
    /// - `Err(Vec<String>)` containing a list of validation error messages otherwise.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if !self.root.is_dir() {
            errors.push(format!(
                "Root '{}' is not an existing directory.",
                self.root.display()
            ));
        }

        if self.cache.path.is_dir() {
            errors.push(format!(
                "Cache path '{}' is a directory, expected a file.",
                self.cache.path.display()
            ));
        }

        if self.cache.path.parent().is_none() {
            errors.push(format!(
                "Cache path '{}' has no parent directory.",
                self.cache.path.display()
            ));
        }

        if self.cache.expire_after_secs == Some(0) {
            errors.push("Cache expire-after-secs must be greater than zero.".to_owned());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Returns config file paths in descending priority order.
    fn config_search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("cachedfs").join("config.toml"));
        }

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".config").join("cachedfs").join("config.toml"));
        }

        paths
    }

    /// Finds the first existing config file from search paths.
    fn find_config_file() -> Option<PathBuf> {
        Self::config_search_paths().into_iter().find(|p| p.exists())
    }

    /// Loads config from a single TOML file.
    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        debug!(path = ?path, "Loading configuration file.");
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Loads configuration from the external path if given, otherwise from the first config
    /// file found. Falls back to defaults when there is none.
    pub fn load(external_config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match external_config_path {
            Some(path) => Some(path.to_path_buf()),
            None => Self::find_config_file(),
        };

        let Some(path) = path else {
            info!("No configuration file found, using defaults.");
            return Ok(Self::default());
        };

        let config = Self::load_from_file(&path)?;
        debug!("Loaded configuration successfully.");
        Ok(config)
    }
}
