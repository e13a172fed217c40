//! Configuration loading
//!
//! Hosts run fine with no config file at all; [`ConfigManager::load`] hands
//! back the defaults when nothing is on disk. The file lives under the
//! platform config directory (`~/.config/frontdesk/config.toml` on Linux)
//! unless the host points the manager somewhere else.

pub mod schema;

pub use schema::{CacheSettings, Config, GeneralConfig, LogFormat, ModalSettings};

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};

/// Failures while reading or writing the config file
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read or written
    #[error("config io on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file exists but does not parse as configuration
    #[error("invalid config at {path}: {reason}")]
    Invalid { path: PathBuf, reason: String },

    /// The active configuration could not be rendered to TOML
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

impl ConfigError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Reads and persists the host configuration file
pub struct ConfigManager {
    path: PathBuf,
}

impl ConfigManager {
    /// Manager for the platform default location
    pub fn new() -> Self {
        Self::with_path(Self::default_path())
    }

    /// Manager for an explicit file, used by tests and portable installs
    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    /// `config.toml` under the user's config directory
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("frontdesk")
            .join("config.toml")
    }

    /// The file this manager reads and writes
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the configuration, defaulting when no file exists.
    ///
    /// Only a missing file falls back to defaults. An unreadable or
    /// unparseable file is an error, so a typo cannot silently reset a
    /// host to stock settings.
    pub async fn load(&self) -> Result<Config, ConfigError> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no config file, using defaults");
                return Ok(Config::default());
            }
            Err(e) => return Err(ConfigError::io(&self.path, e)),
        };

        toml::from_str(&raw).map_err(|e| ConfigError::Invalid {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }

    /// Write the configuration back, creating parent directories as needed
    pub async fn save(&self, config: &Config) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ConfigError::io(parent, e))?;
        }

        let rendered = toml::to_string_pretty(config)?;
        fs::write(&self.path, rendered)
            .await
            .map_err(|e| ConfigError::io(&self.path, e))?;

        info!(path = %self.path.display(), "configuration saved");
        Ok(())
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}
