//! Configuration schema
//!
//! Every section and key is optional: hosts run on the defaults below, and
//! a config file only needs the keys it overrides.

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging and other host-wide switches
    pub general: GeneralConfig,

    /// Query cache tuning
    pub cache: CacheSettings,

    /// Modal URL parameter names
    pub modal: ModalSettings,
}

/// How log lines are rendered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines for a developer terminal
    #[default]
    Text,
    /// One JSON object per event, for log shippers
    Json,
}

/// Host-wide switches
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log at debug level instead of info
    pub verbose: bool,

    /// Rendering of the installed subscriber's output
    pub log_format: LogFormat,
}

/// Query cache tuning
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Treat values older than this many seconds as stale on access.
    /// Zero means never: entries then go stale only by invalidation.
    pub stale_after_secs: u64,
}

impl CacheSettings {
    /// The staleness window as a duration, when one is configured.
    ///
    /// Windows too large for a chrono duration count as no window at all.
    pub fn stale_after(&self) -> Option<Duration> {
        match i64::try_from(self.stale_after_secs) {
            Ok(0) | Err(_) => None,
            Ok(secs) => Duration::try_seconds(secs),
        }
    }
}

/// Modal URL parameter names
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModalSettings {
    /// Query parameter naming the open modal
    pub modal_param: String,
}

impl Default for ModalSettings {
    fn default() -> Self {
        Self {
            modal_param: crate::modal::MODAL_PARAM.to_string(),
        }
    }
}
