//! Cache entry lifecycle.
//!
//! One entry per key, created on first query, updated in place on every
//! resolution. Invalidation marks an entry stale and leaves the value in
//! place; the stale value keeps being served until a fresh load replaces it.

use crate::error::AppError;
use chrono::{DateTime, Duration, Utc};
use futures_util::future::{BoxFuture, Shared};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Outcome of one loader run, delivered to every waiter
pub(crate) type FetchOutcome = Result<Value, AppError>;

/// Joinable handle to an in-flight fetch.
///
/// Late callers clone and await this instead of starting a second loader.
pub(crate) type SharedFetch = Shared<BoxFuture<'static, FetchOutcome>>;

/// Bookkeeping for the at-most-one in-flight fetch of an entry
#[derive(Clone)]
pub(crate) struct InflightFetch {
    /// Identifies the fetch, so a resolution landing after the entry was
    /// removed and recreated cannot clear a newer fetch's handle
    pub id: Uuid,

    /// The handle waiters attach to
    pub handle: SharedFetch,
}

/// One tracked read result
#[derive(Default)]
pub(crate) struct CacheEntry {
    /// Last successfully resolved value, kept across failed refreshes
    pub value: Option<Value>,

    /// Error from the most recent resolution, cleared on success
    pub error: Option<AppError>,

    /// When the value was last resolved
    pub fetched_at: Option<DateTime<Utc>>,

    /// Set by invalidation; forces a fresh load on next access
    pub stale: bool,

    /// The single in-flight fetch, if one is running
    pub inflight: Option<InflightFetch>,
}

impl CacheEntry {
    /// Whether the next access must start (or join) a fetch
    pub fn needs_fetch(&self, stale_after: Option<Duration>) -> bool {
        if self.value.is_none() || self.stale {
            return true;
        }
        match (stale_after, self.fetched_at) {
            (Some(window), Some(at)) => Utc::now() - at >= window,
            _ => false,
        }
    }

    /// Apply a successful resolution: value set, staleness and error cleared
    pub fn resolve_ok(&mut self, value: Value) {
        self.value = Some(value);
        self.error = None;
        self.stale = false;
        self.fetched_at = Some(Utc::now());
    }

    /// Apply a failed resolution: the last good value stays visible
    pub fn resolve_err(&mut self, error: AppError) {
        self.error = Some(error);
    }
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("has_value", &self.value.is_some())
            .field("error", &self.error)
            .field("fetched_at", &self.fetched_at)
            .field("stale", &self.stale)
            .field("in_flight", &self.inflight.is_some())
            .finish()
    }
}
