//! The query cache.
//!
//! [`QueryCache`] is the store every screen's reads and writes go through.
//! Reads ([`QueryCache::query`]) are keyed, de-duplicated (at most one loader
//! in flight per key; late callers attach to the running fetch) and served
//! stale-while-revalidate. Writes ([`QueryCache::mutate`]) run exactly once
//! and, on success, mark every entry covered by their invalidation prefixes
//! stale before anything else observes the result.
//!
//! One instance per application session, cloned (cheaply, by handle) into
//! whatever needs it. Tests build their own isolated instances.
//!
//! Loaders and executors run on spawned tasks: a caller that stops awaiting
//! mid-flight no longer observes the outcome, but the fetch still completes
//! and updates the entry for everyone else.

use crate::cache::entry::{CacheEntry, FetchOutcome, InflightFetch, SharedFetch};
use crate::cache::key::CacheKey;
use crate::config::CacheSettings;
use crate::error::{classify, AppError};
use crate::transport::RawFailure;
use async_trait::async_trait;
use chrono::Duration;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{oneshot, watch};
use tracing::{debug, warn};
use uuid::Uuid;

/// Observer for session-invalidating failures.
///
/// Auth errors are the one error kind with control flow outside the UI:
/// hosts register a listener to reset the session and send the user back
/// to sign-in. The listener runs after the failure has been recorded.
#[async_trait]
pub trait AuthListener: Send + Sync {
    /// Called once per classified auth failure
    async fn on_auth_error(&self, error: &AppError);
}

/// Snapshot of one keyed read
#[derive(Debug, Clone)]
pub struct QueryResult<T> {
    /// The cached or freshly loaded value
    pub data: Option<T>,

    /// Classified failure from the most recent resolution
    pub error: Option<AppError>,

    /// No data yet and the first load is still running
    pub is_loading: bool,

    /// A load is running; with data present this is a background revalidate
    pub is_fetching: bool,
}

impl<T> QueryResult<T> {
    fn empty() -> Self {
        Self {
            data: None,
            error: None,
            is_loading: false,
            is_fetching: false,
        }
    }

    /// Whether the last resolution failed
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Per-call query behavior
#[derive(Debug, Clone, Copy)]
pub struct QueryOptions {
    /// When false, the call touches nothing and returns the empty state.
    /// Used while required parameters (say, an entity id from the URL)
    /// are not available yet.
    pub enabled: bool,

    /// Start a fetch even if the cached value is still fresh
    pub refresh: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            refresh: false,
        }
    }
}

impl QueryOptions {
    /// Options with defaults: enabled, no forced refresh
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether the query may run
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set whether to bypass freshness and fetch anyway
    pub fn refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }
}

/// What a mutation invalidates and who it tells
pub struct MutationOptions<T> {
    invalidates: Vec<CacheKey>,
    on_success: Option<Box<dyn FnOnce(&T) + Send>>,
    on_error: Option<Box<dyn FnOnce(&AppError) + Send>>,
}

impl<T> MutationOptions<T> {
    /// Options with no invalidation and no callbacks
    pub fn new() -> Self {
        Self {
            invalidates: Vec::new(),
            on_success: None,
            on_error: None,
        }
    }

    /// Key prefixes whose covered entries go stale when the mutation succeeds
    pub fn invalidates<I>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = CacheKey>,
    {
        self.invalidates = prefixes.into_iter().collect();
        self
    }

    /// Callback invoked after invalidation has been applied
    pub fn on_success(mut self, callback: impl FnOnce(&T) + Send + 'static) -> Self {
        self.on_success = Some(Box::new(callback));
        self
    }

    /// Callback invoked with the classified error when the mutation fails
    pub fn on_error(mut self, callback: impl FnOnce(&AppError) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(callback));
        self
    }
}

impl<T> Default for MutationOptions<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for MutationOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationOptions")
            .field("invalidates", &self.invalidates)
            .field("on_success", &self.on_success.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

struct CacheInner {
    entries: HashMap<CacheKey, CacheEntry>,
    revision: u64,
    auth_listener: Option<Arc<dyn AuthListener>>,
}

/// Key-addressed cache of asynchronous read results plus the mutation path
#[derive(Clone)]
pub struct QueryCache {
    id: Uuid,
    stale_after: Option<Duration>,
    inner: Arc<Mutex<CacheInner>>,
    changes: Arc<watch::Sender<u64>>,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of the locked lookup phase of a query
enum Lookup {
    /// Fresh value, nothing to do
    Hit {
        value: Value,
        error: Option<AppError>,
    },
    /// A fetch is running and a value exists: serve it, report fetching
    Serve {
        value: Value,
        error: Option<AppError>,
    },
    /// A fetch is running and there is nothing to serve: wait for it
    Join(SharedFetch),
    /// No fetch is running and one is needed
    Start {
        fetch_id: Uuid,
        tx: oneshot::Sender<FetchOutcome>,
        handle: SharedFetch,
        stale: Option<(Value, Option<AppError>)>,
    },
}

impl QueryCache {
    /// Cache with default settings
    pub fn new() -> Self {
        Self::with_settings(CacheSettings::default())
    }

    /// Cache tuned by [`CacheSettings`]
    pub fn with_settings(settings: CacheSettings) -> Self {
        let id = Uuid::new_v4();
        let (changes, _) = watch::channel(0);
        debug!(cache = %id, "created query cache");
        Self {
            id,
            stale_after: settings.stale_after(),
            inner: Arc::new(Mutex::new(CacheInner {
                entries: HashMap::new(),
                revision: 0,
                auth_listener: None,
            })),
            changes: Arc::new(changes),
        }
    }

    /// Identity of this cache instance, for log correlation
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Register the observer for auth failures
    pub fn set_auth_listener(&self, listener: Arc<dyn AuthListener>) {
        self.lock().auth_listener = Some(listener);
    }

    /// Receiver that observes a revision bump on every cache write.
    ///
    /// Coarse-grained: consumers re-read whatever keys they care about.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    /// Run a keyed read through the cache.
    ///
    /// With no usable entry the call awaits the loader and returns its
    /// resolution. With a stale value and a fetch due (invalidation, the
    /// staleness window, or `refresh`), the stale value is returned
    /// immediately and the fetch proceeds in the background. Duplicate
    /// concurrent calls share one loader invocation and one resolution.
    /// A loader that panics resolves like one that failed.
    pub async fn query<T, F, Fut>(
        &self,
        key: CacheKey,
        loader: F,
        options: QueryOptions,
    ) -> QueryResult<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, RawFailure>> + Send + 'static,
    {
        if !options.enabled {
            return QueryResult::empty();
        }

        let lookup = {
            let mut inner = self.lock();
            let entry = inner.entries.entry(key.clone()).or_default();

            if let Some(inflight) = entry.inflight.clone() {
                match entry.value.clone() {
                    Some(value) => Lookup::Serve {
                        value,
                        error: entry.error.clone(),
                    },
                    None => Lookup::Join(inflight.handle),
                }
            } else if options.refresh || entry.needs_fetch(self.stale_after) {
                let fetch_id = Uuid::new_v4();
                let (tx, rx) = oneshot::channel::<FetchOutcome>();
                let handle: SharedFetch = async move {
                    rx.await.unwrap_or_else(|_| Err(AppError::generic()))
                }
                .boxed()
                .shared();
                entry.inflight = Some(InflightFetch {
                    id: fetch_id,
                    handle: handle.clone(),
                });
                let stale = entry.value.clone().map(|v| (v, entry.error.clone()));
                Lookup::Start {
                    fetch_id,
                    tx,
                    handle,
                    stale,
                }
            } else {
                // needs_fetch is false only when a value is present
                Lookup::Hit {
                    value: entry.value.clone().unwrap_or(Value::Null),
                    error: entry.error.clone(),
                }
            }
        };

        match lookup {
            Lookup::Hit { value, error } => {
                debug!(%key, "cache hit");
                self.result_from_value(&key, value, error, false)
            }
            Lookup::Serve { value, error } => {
                debug!(%key, "serving cached value while fetch is in flight");
                self.result_from_value(&key, value, error, true)
            }
            Lookup::Join(handle) => {
                debug!(%key, "joining in-flight fetch");
                self.result_from_outcome(&key, handle.await)
            }
            Lookup::Start {
                fetch_id,
                tx,
                handle,
                stale,
            } => {
                debug!(%key, fetch = %fetch_id, "starting fetch");
                self.spawn_fetch(key.clone(), fetch_id, loader(), tx);
                match stale {
                    Some((value, error)) => self.result_from_value(&key, value, error, true),
                    None => self.result_from_outcome(&key, handle.await),
                }
            }
        }
    }

    /// Current state of a key without fetching or awaiting.
    ///
    /// This is the render-loop accessor: it reports `is_loading` while the
    /// first load of a key is in flight.
    pub fn peek<T>(&self, key: &CacheKey) -> QueryResult<T>
    where
        T: DeserializeOwned,
    {
        let (value, error, has_value, fetching) = {
            let inner = self.lock();
            let Some(entry) = inner.entries.get(key) else {
                return QueryResult::empty();
            };
            (
                entry.value.clone(),
                entry.error.clone(),
                entry.value.is_some(),
                entry.inflight.is_some(),
            )
        };

        let (data, decode_error) = match value {
            Some(value) => match self.decode::<T>(key, value) {
                Ok(data) => (Some(data), None),
                Err(error) => (None, Some(error)),
            },
            None => (None, None),
        };

        QueryResult {
            data,
            error: decode_error.or(error),
            is_loading: fetching && !has_value,
            is_fetching: fetching,
        }
    }

    /// Run a write through the cache.
    ///
    /// The executor runs exactly once, on a spawned task, so a completed
    /// write's invalidation is never lost to caller cancellation. On success
    /// every tracked key covered by an invalidation prefix goes stale before
    /// `on_success` (and before this call returns); on failure the classified
    /// error reaches `on_error` and is returned. No retries, no
    /// de-duplication: writes are not idempotent by default.
    pub async fn mutate<V, T, F, Fut>(
        &self,
        executor: F,
        vars: V,
        options: MutationOptions<T>,
    ) -> Result<T, AppError>
    where
        T: Send + 'static,
        F: FnOnce(V) -> Fut,
        Fut: Future<Output = Result<T, RawFailure>> + Send + 'static,
    {
        let MutationOptions {
            invalidates,
            on_success,
            on_error,
        } = options;

        let mutation_id = Uuid::new_v4();
        debug!(mutation = %mutation_id, prefixes = invalidates.len(), "starting mutation");

        let fut = executor(vars);
        let (tx, rx) = oneshot::channel::<Result<T, AppError>>();
        let store = self.clone();

        tokio::spawn(async move {
            match fut.await {
                Ok(value) => {
                    let marked = store.invalidate(&invalidates);
                    debug!(mutation = %mutation_id, marked, "mutation succeeded");
                    if let Some(callback) = on_success {
                        callback(&value);
                    }
                    let _ = tx.send(Ok(value));
                }
                Err(raw) => {
                    let error = classify(raw);
                    debug!(mutation = %mutation_id, kind = ?error.kind, "mutation failed");
                    if let Some(callback) = on_error {
                        callback(&error);
                    }
                    let listener = store.auth_listener_for(&error);
                    let _ = tx.send(Err(error.clone()));
                    if let Some(listener) = listener {
                        listener.on_auth_error(&error).await;
                    }
                }
            }
        });

        rx.await.unwrap_or_else(|_| Err(AppError::generic()))
    }

    /// Mark every tracked entry covered by any of the prefixes stale.
    ///
    /// Values stay in place and keep being served until the forced refetch
    /// resolves. Returns how many entries were marked.
    pub fn invalidate(&self, prefixes: &[CacheKey]) -> usize {
        let marked = {
            let mut inner = self.lock();
            let mut marked = 0;
            for (key, entry) in inner.entries.iter_mut() {
                if prefixes.iter().any(|prefix| prefix.covers(key)) {
                    entry.stale = true;
                    marked += 1;
                }
            }
            if marked > 0 {
                inner.revision += 1;
                let revision = inner.revision;
                drop(inner);
                self.changes.send_replace(revision);
            }
            marked
        };
        if marked > 0 {
            debug!(marked, "invalidated cache entries");
        }
        marked
    }

    /// Seed or overwrite a key's value directly.
    ///
    /// The entry comes out fresh: error and staleness cleared. Used for
    /// optimistic writes and for priming details a list response already
    /// carried.
    pub fn set_value<T: Serialize>(&self, key: CacheKey, value: &T) -> Result<(), AppError> {
        let value = serde_json::to_value(value).map_err(|e| {
            warn!(%key, error = %e, "value failed to serialize for seeding");
            AppError::generic()
        })?;
        let revision = {
            let mut inner = self.lock();
            let entry = inner.entries.entry(key.clone()).or_default();
            entry.resolve_ok(value);
            inner.revision += 1;
            inner.revision
        };
        self.changes.send_replace(revision);
        debug!(%key, "seeded cache entry");
        Ok(())
    }

    /// Stop tracking a key entirely.
    ///
    /// A fetch already in flight for the key still resolves its waiters but
    /// no longer updates the store. Returns whether the key was tracked.
    pub fn remove(&self, key: &CacheKey) -> bool {
        let removed = {
            let mut inner = self.lock();
            let removed = inner.entries.remove(key).is_some();
            if removed {
                inner.revision += 1;
                let revision = inner.revision;
                drop(inner);
                self.changes.send_replace(revision);
            }
            removed
        };
        if removed {
            debug!(%key, "removed cache entry");
        }
        removed
    }

    /// Drop every tracked entry
    pub fn clear(&self) {
        let revision = {
            let mut inner = self.lock();
            inner.entries.clear();
            inner.revision += 1;
            inner.revision
        };
        self.changes.send_replace(revision);
        debug!("cleared query cache");
    }

    /// Number of tracked keys
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether no keys are tracked
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        // Sections under this lock only touch plain data, so the state is
        // coherent even after a poisoning panic elsewhere.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn spawn_fetch<T, Fut>(
        &self,
        key: CacheKey,
        fetch_id: Uuid,
        fut: Fut,
        tx: oneshot::Sender<FetchOutcome>,
    ) where
        T: Serialize + Send + 'static,
        Fut: Future<Output = Result<T, RawFailure>> + Send + 'static,
    {
        let store = self.clone();
        let erased: BoxFuture<'static, FetchOutcome> = async move {
            match fut.await {
                Ok(value) => match serde_json::to_value(value) {
                    Ok(value) => Ok(value),
                    Err(e) => {
                        warn!(error = %e, "loaded value failed to serialize");
                        Err(AppError::generic())
                    }
                },
                Err(raw) => Err(classify(raw)),
            }
        }
        .boxed();

        tokio::spawn(async move {
            // A panicked loader resolves like a failed one; the in-flight
            // handle still clears and the key can retry.
            let outcome = AssertUnwindSafe(erased)
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    warn!(%key, "loader panicked");
                    Err(AppError::generic())
                });
            let notify = store.apply_resolution(&key, fetch_id, outcome.clone());
            // Waiters wake only after the entry reflects the outcome.
            let _ = tx.send(outcome);
            if let Some((listener, error)) = notify {
                listener.on_auth_error(&error).await;
            }
        });
    }

    /// Record a fetch outcome on its entry.
    ///
    /// Returns the auth listener to notify when the outcome was an auth
    /// failure; the caller runs it outside the lock.
    fn apply_resolution(
        &self,
        key: &CacheKey,
        fetch_id: Uuid,
        outcome: FetchOutcome,
    ) -> Option<(Arc<dyn AuthListener>, AppError)> {
        let (revision, notify) = {
            let mut inner = self.lock();
            let Some(entry) = inner.entries.get_mut(key) else {
                debug!(%key, "fetch resolved for an untracked key");
                return None;
            };

            let auth_error = match outcome {
                Ok(value) => {
                    debug!(%key, "fetch resolved");
                    entry.resolve_ok(value);
                    None
                }
                Err(error) => {
                    debug!(%key, kind = ?error.kind, "fetch failed");
                    let auth = error.is_auth_error().then(|| error.clone());
                    entry.resolve_err(error);
                    auth
                }
            };

            // Only the fetch that registered the handle may clear it; a
            // resolution racing a removed-and-recreated entry must not
            // cancel the newer fetch.
            if entry
                .inflight
                .as_ref()
                .is_some_and(|inflight| inflight.id == fetch_id)
            {
                entry.inflight = None;
            }

            inner.revision += 1;
            let notify = auth_error
                .and_then(|error| inner.auth_listener.clone().map(|listener| (listener, error)));
            (inner.revision, notify)
        };
        self.changes.send_replace(revision);
        notify
    }

    fn auth_listener_for(&self, error: &AppError) -> Option<Arc<dyn AuthListener>> {
        if error.is_auth_error() {
            self.lock().auth_listener.clone()
        } else {
            None
        }
    }

    fn decode<T: DeserializeOwned>(&self, key: &CacheKey, value: Value) -> Result<T, AppError> {
        serde_json::from_value(value).map_err(|e| {
            warn!(cache = %self.id, %key, error = %e, "cached value failed to decode");
            AppError::generic()
        })
    }

    fn result_from_value<T: DeserializeOwned>(
        &self,
        key: &CacheKey,
        value: Value,
        error: Option<AppError>,
        fetching: bool,
    ) -> QueryResult<T> {
        let (data, decode_error) = match self.decode::<T>(key, value) {
            Ok(data) => (Some(data), None),
            Err(error) => (None, Some(error)),
        };
        QueryResult {
            data,
            error: decode_error.or(error),
            is_loading: false,
            is_fetching: fetching,
        }
    }

    fn result_from_outcome<T: DeserializeOwned>(
        &self,
        key: &CacheKey,
        outcome: FetchOutcome,
    ) -> QueryResult<T> {
        match outcome {
            Ok(value) => self.result_from_value(key, value, None, false),
            Err(error) => QueryResult {
                data: None,
                error: Some(error),
                is_loading: false,
                is_fetching: false,
            },
        }
    }
}

impl fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryCache")
            .field("id", &self.id)
            .field("entries", &self.len())
            .finish()
    }
}
