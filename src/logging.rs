//! Logging setup
//!
//! Hosts call [`init`] (or [`init_with`] when they have loaded
//! configuration) once at startup. `RUST_LOG` overrides the configured
//! level when set.

use crate::config::{GeneralConfig, LogFormat};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Filter applied when `RUST_LOG` is unset
const DEFAULT_FILTER: &str = "frontdesk_data=info";

/// Filter applied when `RUST_LOG` is unset and verbose is configured
const VERBOSE_FILTER: &str = "frontdesk_data=debug";

/// Failures while installing the global subscriber
#[derive(Debug, Error)]
pub enum LoggingError {
    /// Some other subscriber was installed first
    #[error("a global tracing subscriber is already set")]
    SubscriberAlreadySet,
}

/// Initialize logging with default settings
pub fn init() -> Result<(), LoggingError> {
    init_with(&GeneralConfig::default())
}

/// Initialize logging from configuration
pub fn init_with(general: &GeneralConfig) -> Result<(), LoggingError> {
    let default = if general.verbose {
        VERBOSE_FILTER
    } else {
        DEFAULT_FILTER
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = match general.log_format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|_| LoggingError::SubscriberAlreadySet)
}
