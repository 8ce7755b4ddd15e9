//! Process-local store.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use super::{KeyValueStore, StorageResult};

/// A [`KeyValueStore`] held in process memory.
///
/// Useful for hosts without a durable backend and for tests. Values are
/// cloned in and out so callers never share state by reference.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, keys: &[String]) -> StorageResult<HashMap<String, Value>> {
        let values = self.values.read();
        Ok(keys
            .iter()
            .filter_map(|k| values.get(k).map(|v| (k.clone(), v.clone())))
            .collect())
    }

    async fn set(&self, items: HashMap<String, Value>) -> StorageResult<()> {
        self.values.write().extend(items);
        Ok(())
    }

    async fn remove(&self, keys: &[String]) -> StorageResult<()> {
        let mut values = self.values.write();
        for key in keys {
            values.remove(key);
        }
        Ok(())
    }

    async fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.values.read().keys().cloned().collect())
    }
}
