//! Durable key-value store abstraction.
//!
//! The limiter persists one JSON document per namespace. Stores only need
//! whole-value semantics: `set` replaces a key's value outright and nothing
//! spans more than one call, so a read followed by a write is not atomic.

mod file;
mod memory;

#[cfg(test)]
pub(crate) mod testing;

pub use file::FileStore;
pub use memory::MemoryStore;

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Errors raised by a durable store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend cannot be reached or refused the operation
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A value could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem errors from file-backed stores
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The call did not complete within the configured timeout
    #[error("Store call timed out after {0} ms")]
    Timeout(u64),
}

/// Result type alias for store operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// A JSON key-value store shared by every limiter process.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Fetch the given keys. Keys that were never written are absent from
    /// the returned map.
    async fn get(&self, keys: &[String]) -> StorageResult<HashMap<String, Value>>;

    /// Replace the value of each given key.
    async fn set(&self, items: HashMap<String, Value>) -> StorageResult<()>;

    /// Delete the given keys. Missing keys are ignored.
    async fn remove(&self, keys: &[String]) -> StorageResult<()>;

    /// List every key currently stored.
    async fn keys(&self) -> StorageResult<Vec<String>>;
}
