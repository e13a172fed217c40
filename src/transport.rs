//! Failure shapes produced by the transport layer.
//!
//! The HTTP client, request middleware, and validation middleware all reject
//! with different shapes. This module pins them down as one closed sum type,
//! [`RawFailure`], at the boundary, so classification can match exhaustively
//! instead of probing fields. Failures that arrive as loose JSON (a rejected
//! body, a logged payload) are decoded with [`RawFailure::from_value`], which
//! applies the same first-match-wins precedence the portals have always used.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Message the request middleware attaches to a declared timeout.
pub const TIMEOUT_MESSAGE: &str = "Request timeout";

/// Status marker the HTTP client uses when the request never reached a server.
pub const FETCH_ERROR_MARKER: &str = "FETCH_ERROR";

/// Decoded error body of an HTTP response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpErrorBody {
    /// Server-provided message, if any
    pub message: Option<String>,

    /// Server-provided machine-readable code, if any
    pub code: Option<String>,
}

impl HttpErrorBody {
    /// Body with a message and no code
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            code: None,
        }
    }
}

/// Everything a loader or executor can reject with.
///
/// Variants are ordered by classification precedence: a value decoded by
/// [`RawFailure::from_value`] lands in the first variant whose marker it
/// carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawFailure {
    /// The request's own deadline elapsed before a response arrived
    Timeout,

    /// The transport could not reach a server at all (DNS, refused, offline)
    FetchFailed,

    /// A server responded with a non-success status
    Http {
        /// Numeric HTTP status
        status: u16,
        /// Decoded error body, when one was present and parseable
        body: Option<HttpErrorBody>,
    },

    /// Validation middleware rejected the payload, field by field.
    ///
    /// Ordered map so the joined message is deterministic.
    Validation(BTreeMap<String, String>),

    /// A plain error message with no further structure
    Message(String),

    /// Anything else: non-object rejections, unrecognized shapes
    Opaque,
}

impl RawFailure {
    /// HTTP failure with no body
    pub fn http(status: u16) -> Self {
        Self::Http { status, body: None }
    }

    /// HTTP failure with a body message
    pub fn http_message(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            body: Some(HttpErrorBody::message(message)),
        }
    }

    /// Validation failure from field/message pairs
    pub fn validation<K, V>(details: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self::Validation(
            details
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Decode a loose JSON failure value.
    ///
    /// First match wins, in this order: non-object, timeout marker,
    /// fetch-failed marker, numeric HTTP status, validation details,
    /// message string, opaque. Total: every value decodes to something.
    pub fn from_value(value: &Value) -> Self {
        let Some(object) = value.as_object() else {
            return Self::Opaque;
        };

        let message = object.get("message").and_then(Value::as_str);

        if message == Some(TIMEOUT_MESSAGE) {
            return Self::Timeout;
        }

        if object.get("status").and_then(Value::as_str) == Some(FETCH_ERROR_MARKER) {
            return Self::FetchFailed;
        }

        if let Some(status) = object
            .get("status")
            .and_then(Value::as_u64)
            .and_then(|s| u16::try_from(s).ok())
        {
            return Self::Http {
                status,
                body: object.get("data").map(decode_body),
            };
        }

        if let Some(details) = object
            .get("data")
            .and_then(|data| data.get("error"))
            .and_then(|error| error.get("details"))
            .and_then(Value::as_object)
        {
            let details: BTreeMap<String, String> = details
                .iter()
                .filter_map(|(field, msg)| Some((field.clone(), msg.as_str()?.to_string())))
                .collect();
            // A details object with no string messages carries nothing usable;
            // let the later rules have a look instead.
            if !details.is_empty() {
                return Self::Validation(details);
            }
        }

        if let Some(message) = message {
            return Self::Message(message.to_string());
        }

        Self::Opaque
    }
}

impl From<&Value> for RawFailure {
    fn from(value: &Value) -> Self {
        Self::from_value(value)
    }
}

fn decode_body(data: &Value) -> HttpErrorBody {
    serde_json::from_value(data.clone()).unwrap_or_default()
}
