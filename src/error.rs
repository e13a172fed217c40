//! Canonical error surface for the portals.
//!
//! Every failure a loader or executor rejects with is normalized into one
//! [`AppError`] by [`classify`]. Screens decide the UI treatment (toast,
//! inline, silent) from the [`ErrorKind`]; auth handling is the only kind
//! with control flow attached outside the UI.

use crate::transport::RawFailure;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

const MSG_GENERIC: &str = "Something went wrong. Please try again.";
const MSG_TIMEOUT: &str = "Request timed out. Check your connection and try again.";
const MSG_NETWORK: &str = "Unable to reach the server. Check your connection and try again.";
const MSG_SESSION_EXPIRED: &str = "Session expired. Please sign in again.";
const MSG_FORBIDDEN: &str = "You do not have permission to perform this action.";
const MSG_NOT_FOUND: &str = "Requested resource was not found.";
const MSG_SERVER: &str = "Server error. Please try again later.";
const MSG_BAD_REQUEST: &str = "Invalid request.";
const MSG_REQUEST_FAILED: &str = "Request failed.";

/// Failure categories the portals react to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Server unreachable, request never completed
    Network,
    /// Request exceeded its own deadline
    Timeout,
    /// Session is no longer valid (401)
    Auth,
    /// Authenticated but not allowed (403)
    Permission,
    /// Target entity does not exist (404)
    NotFound,
    /// Payload rejected by validation (400 or field details)
    Validation,
    /// The server failed (5xx)
    Server,
    /// Everything else
    Generic,
}

/// Normalized error consumed by screens and auth logic
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct AppError {
    /// Category driving UI treatment
    pub kind: ErrorKind,

    /// Ready-to-display message
    pub message: String,

    /// HTTP status, when the failure came from a response
    pub status: Option<u16>,

    /// Server-provided machine-readable code, when present
    pub code: Option<String>,
}

impl AppError {
    fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            code: None,
        }
    }

    /// The default error when nothing more specific is known
    pub fn generic() -> Self {
        Self::new(ErrorKind::Generic, MSG_GENERIC)
    }

    /// Whether the request never reached a server
    pub fn is_network_error(&self) -> bool {
        self.kind == ErrorKind::Network
    }

    /// Whether the request timed out
    pub fn is_timeout(&self) -> bool {
        self.kind == ErrorKind::Timeout
    }

    /// Whether the session is no longer valid.
    ///
    /// The one predicate with control-flow significance: callers use it to
    /// reset the session and redirect to sign-in.
    pub fn is_auth_error(&self) -> bool {
        self.kind == ErrorKind::Auth
    }
}

/// Map a raw transport failure to its canonical error.
///
/// Total and deterministic: every failure maps to exactly one [`AppError`],
/// and nothing here can panic.
pub fn classify(raw: RawFailure) -> AppError {
    match raw {
        RawFailure::Timeout => AppError::new(ErrorKind::Timeout, MSG_TIMEOUT),
        RawFailure::FetchFailed => AppError::new(ErrorKind::Network, MSG_NETWORK),
        RawFailure::Http { status, body } => {
            let body = body.unwrap_or_default();
            let (kind, message) = match status {
                400 => (
                    ErrorKind::Validation,
                    body.message.unwrap_or_else(|| MSG_BAD_REQUEST.to_string()),
                ),
                401 => (ErrorKind::Auth, MSG_SESSION_EXPIRED.to_string()),
                403 => (ErrorKind::Permission, MSG_FORBIDDEN.to_string()),
                404 => (ErrorKind::NotFound, MSG_NOT_FOUND.to_string()),
                s if s >= 500 => (ErrorKind::Server, MSG_SERVER.to_string()),
                _ => (
                    ErrorKind::Generic,
                    body.message
                        .unwrap_or_else(|| MSG_REQUEST_FAILED.to_string()),
                ),
            };
            AppError {
                kind,
                message,
                status: Some(status),
                code: body.code,
            }
        }
        RawFailure::Validation(details) => {
            let message = details.values().cloned().collect::<Vec<_>>().join(", ");
            AppError::new(ErrorKind::Validation, message)
        }
        RawFailure::Message(message) => AppError::new(ErrorKind::Generic, message),
        RawFailure::Opaque => AppError::generic(),
    }
}

/// Classify a failure that arrived as loose JSON
pub fn classify_value(value: &Value) -> AppError {
    classify(RawFailure::from_value(value))
}

impl From<RawFailure> for AppError {
    fn from(raw: RawFailure) -> Self {
        classify(raw)
    }
}
