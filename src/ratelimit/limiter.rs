//! Durable sliding-window rate limiter.
//!
//! Each namespace's state is one JSON document in the shared store, read and
//! rewritten whole on every recorded event. There is no read-modify-write
//! atomicity: two processes admitting the same identifier at the same moment
//! can both read the old document and the second write wins, dropping the
//! first event. The limiter is therefore approximate under concurrent
//! writers, not a strict quota.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::clock::Clock;
use crate::config::{validate_limits, Settings};
use crate::error::Result;
use crate::storage::{KeyValueStore, StorageError, StorageResult};

use super::memory::MemoryWindows;
use super::window::{
    enforce_capacity, prune_store, remaining, reset_time, window_start, RateLimitStore,
    RateWindowEntry,
};

/// Where a durable `is_allowed` attempt gave up.
enum StoreFailure {
    /// Nothing was decided; the memory window decides instead.
    Read(StorageError),
    /// The event was admitted but could not be persisted; the memory window
    /// decides instead.
    Write(StorageError),
}

/// Summary of one cleanup pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Identifiers dropped from the durable record
    pub removed: usize,
    /// Identifiers whose durable timestamps were trimmed
    pub rewritten: usize,
    /// Identifiers dropped from the memory fallback
    pub memory_removed: usize,
    /// Whether the durable record was written back
    pub persisted: bool,
}

/// A sliding-window limiter for one namespace.
///
/// Cloning is cheap and clones share state.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<LimiterInner>,
}

pub(crate) struct LimiterInner {
    namespace: String,
    window_ms: u64,
    max_requests: u64,
    storage_key: String,
    max_identifiers: usize,
    storage_timeout: Option<Duration>,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    memory: MemoryWindows,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("namespace", &self.inner.namespace)
            .field("window_ms", &self.inner.window_ms)
            .field("max_requests", &self.inner.max_requests)
            .field("storage_key", &self.inner.storage_key)
            .finish()
    }
}

impl RateLimiter {
    /// Build a limiter without registering any cleanup trigger. Hosts go
    /// through [`super::LimiterRegistry::create`].
    pub(crate) fn new(
        namespace: &str,
        window_ms: u64,
        max_requests: u64,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        settings: &Settings,
    ) -> Result<Self> {
        validate_limits(namespace, window_ms, max_requests)?;

        Ok(Self {
            inner: Arc::new(LimiterInner {
                namespace: namespace.to_string(),
                window_ms,
                max_requests,
                storage_key: settings.storage_key(namespace),
                max_identifiers: settings.max_identifiers,
                storage_timeout: settings.storage_timeout(),
                store,
                clock,
                memory: MemoryWindows::new(),
            }),
        })
    }

    pub(crate) fn downgrade(&self) -> std::sync::Weak<LimiterInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn from_inner(inner: Arc<LimiterInner>) -> Self {
        Self { inner }
    }

    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    pub fn window_ms(&self) -> u64 {
        self.inner.window_ms
    }

    pub fn max_requests(&self) -> u64 {
        self.inner.max_requests
    }

    /// Durable key holding this namespace's record.
    pub fn storage_key(&self) -> &str {
        &self.inner.storage_key
    }

    /// Identifiers currently tracked by the in-memory fallback.
    pub fn memory_len(&self) -> usize {
        self.inner.memory.len()
    }

    /// Decide whether `identifier` may perform one more event, recording it
    /// if so.
    ///
    /// Never fails: if the store cannot be read, or an admitted event cannot
    /// be persisted, the process-local window decides instead.
    pub async fn is_allowed(&self, identifier: &str) -> bool {
        let inner = &self.inner;
        let now = inner.clock.now_ms();
        let start = window_start(now, inner.window_ms);

        match self.record_durable(identifier, now, start).await {
            Ok(allowed) => allowed,
            Err(StoreFailure::Read(e)) => {
                warn!(
                    namespace = %inner.namespace,
                    identifier = %identifier,
                    error = %e,
                    "Durable rate limit state unavailable, using in-memory window"
                );
                inner
                    .memory
                    .check_and_record(identifier, now, start, inner.max_requests)
            }
            Err(StoreFailure::Write(e)) => {
                warn!(
                    namespace = %inner.namespace,
                    identifier = %identifier,
                    error = %e,
                    "Failed to persist rate limit event, using in-memory window"
                );
                inner
                    .memory
                    .check_and_record(identifier, now, start, inner.max_requests)
            }
        }
    }

    /// Same decision as [`is_allowed`](Self::is_allowed) using only the
    /// process-local window. Never touches the durable store.
    pub fn is_allowed_sync(&self, identifier: &str) -> bool {
        let inner = &self.inner;
        let now = inner.clock.now_ms();
        let start = window_start(now, inner.window_ms);
        inner
            .memory
            .check_and_record(identifier, now, start, inner.max_requests)
    }

    /// Events `identifier` may still perform in the current window.
    pub async fn get_remaining(&self, identifier: &str) -> u64 {
        let inner = &self.inner;
        let now = inner.clock.now_ms();
        let start = window_start(now, inner.window_ms);

        let valid = match self.load().await {
            Ok(store) => store
                .get(identifier)
                .map(|entry| entry.valid_count(start))
                .unwrap_or(0),
            Err(_) => inner.memory.valid(identifier, start).len(),
        };

        remaining(inner.max_requests, valid)
    }

    /// Milliseconds until the oldest counted event leaves the window, or 0
    /// when nothing is counted. Assumes the full window when the store
    /// cannot be read.
    pub async fn get_reset_time(&self, identifier: &str) -> u64 {
        let inner = &self.inner;
        let now = inner.clock.now_ms();
        let start = window_start(now, inner.window_ms);

        match self.load().await {
            Ok(store) => {
                let oldest = store.get(identifier).and_then(|e| e.oldest_valid(start));
                reset_time(oldest, inner.window_ms, now)
            }
            Err(e) => {
                warn!(
                    namespace = %inner.namespace,
                    identifier = %identifier,
                    error = %e,
                    "Durable rate limit state unavailable, assuming a full window"
                );
                inner.window_ms
            }
        }
    }

    /// Forget everything recorded for `identifier`.
    pub async fn reset(&self, identifier: &str) {
        let inner = &self.inner;
        inner.memory.remove(identifier);

        let result = async {
            let mut store = self.load().await?;
            if store.remove(identifier).is_some() {
                self.save(&store).await?;
            }
            Ok::<_, StorageError>(())
        }
        .await;

        if let Err(e) = result {
            warn!(
                namespace = %inner.namespace,
                identifier = %identifier,
                error = %e,
                "Failed to reset durable rate limit state"
            );
        }
    }

    /// Forget everything recorded in this namespace.
    pub async fn reset_all(&self) {
        let inner = &self.inner;
        inner.memory.clear();

        let keys = [inner.storage_key.clone()];
        if let Err(e) = self.guarded(inner.store.remove(&keys)).await {
            warn!(
                namespace = %inner.namespace,
                error = %e,
                "Failed to clear durable rate limit state"
            );
        }
    }

    /// Purge expired timestamps from the durable record and the memory
    /// fallback. A durable failure is logged and does not stop the memory
    /// pass.
    pub async fn cleanup(&self) -> CleanupReport {
        let inner = &self.inner;
        let now = inner.clock.now_ms();
        let start = window_start(now, inner.window_ms);
        let mut report = CleanupReport::default();

        let durable = async {
            let mut store = self.load().await?;
            let (removed, rewritten) = prune_store(&mut store, start, now);
            let changed = removed > 0 || rewritten > 0;
            if changed {
                self.save(&store).await?;
            }
            Ok::<_, StorageError>((removed, rewritten, changed))
        }
        .await;

        match durable {
            Ok((removed, rewritten, persisted)) => {
                report.removed = removed;
                report.rewritten = rewritten;
                report.persisted = persisted;
            }
            Err(e) => {
                warn!(
                    namespace = %inner.namespace,
                    error = %e,
                    "Durable rate limit cleanup failed"
                );
            }
        }

        report.memory_removed = inner.memory.prune(start);

        debug!(
            namespace = %inner.namespace,
            removed = report.removed,
            rewritten = report.rewritten,
            memory_removed = report.memory_removed,
            "Rate limit cleanup finished"
        );
        report
    }

    pub(crate) fn clear_memory(&self) {
        self.inner.memory.clear();
    }

    async fn record_durable(
        &self,
        identifier: &str,
        now: u64,
        start: u64,
    ) -> std::result::Result<bool, StoreFailure> {
        let inner = &self.inner;
        let mut store = self.load().await.map_err(StoreFailure::Read)?;

        let mut valid = store
            .get(identifier)
            .map(|entry| entry.valid(start))
            .unwrap_or_default();

        if valid.len() as u64 >= inner.max_requests {
            debug!(
                namespace = %inner.namespace,
                identifier = %identifier,
                count = valid.len(),
                limit = inner.max_requests,
                "Rate limit exceeded"
            );
            return Ok(false);
        }

        valid.push(now);
        trace!(
            namespace = %inner.namespace,
            identifier = %identifier,
            count = valid.len(),
            "Recording rate limited event"
        );
        store.insert(identifier.to_string(), RateWindowEntry::new(valid, now));

        let evicted = enforce_capacity(&mut store, inner.max_identifiers, identifier);
        if !evicted.is_empty() {
            debug!(
                namespace = %inner.namespace,
                evicted = evicted.len(),
                "Evicted least recently updated identifiers"
            );
        }

        self.save(&store).await.map_err(StoreFailure::Write)?;
        Ok(true)
    }

    async fn load(&self) -> StorageResult<RateLimitStore> {
        let inner = &self.inner;
        let keys = [inner.storage_key.clone()];
        let mut values = self.guarded(inner.store.get(&keys)).await?;

        match values.remove(&inner.storage_key) {
            Some(Value::Null) | None => Ok(RateLimitStore::new()),
            Some(value) => Ok(serde_json::from_value(value)?),
        }
    }

    async fn save(&self, store: &RateLimitStore) -> StorageResult<()> {
        let inner = &self.inner;
        let value = serde_json::to_value(store)?;
        let items = HashMap::from([(inner.storage_key.clone(), value)]);
        self.guarded(inner.store.set(items)).await
    }

    async fn guarded<T, F>(&self, call: F) -> StorageResult<T>
    where
        F: Future<Output = StorageResult<T>>,
    {
        match self.inner.storage_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| StorageError::Timeout(limit.as_millis() as u64))?,
            None => call.await,
        }
    }
}
