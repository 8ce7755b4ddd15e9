//! Store test doubles.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::Value;

use super::{KeyValueStore, MemoryStore, StorageError, StorageResult};

/// A [`MemoryStore`] whose operations can be made to fail on demand.
#[derive(Debug, Default)]
pub(crate) struct FlakyStore {
    pub inner: MemoryStore,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    pub writes: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that rejects every call.
    pub fn broken() -> Self {
        let store = Self::default();
        store.fail_reads(true);
        store.fail_writes(true);
        store
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check(&self, flag: &AtomicBool) -> StorageResult<()> {
        if flag.load(Ordering::SeqCst) {
            Err(StorageError::Unavailable("injected failure".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl KeyValueStore for FlakyStore {
    async fn get(&self, keys: &[String]) -> StorageResult<HashMap<String, Value>> {
        self.check(&self.fail_reads)?;
        self.inner.get(keys).await
    }

    async fn set(&self, items: HashMap<String, Value>) -> StorageResult<()> {
        self.check(&self.fail_writes)?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.set(items).await
    }

    async fn remove(&self, keys: &[String]) -> StorageResult<()> {
        self.check(&self.fail_writes)?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.remove(keys).await
    }

    async fn keys(&self) -> StorageResult<Vec<String>> {
        self.check(&self.fail_reads)?;
        self.inner.keys().await
    }
}
