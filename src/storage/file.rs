//! JSON-file backed store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, trace};
use uuid::Uuid;

use super::{KeyValueStore, StorageError, StorageResult};

/// A [`KeyValueStore`] persisted as a single JSON object on disk.
///
/// Writes go to a uniquely named sibling temp file which is then renamed
/// over the target, so neither a crash nor a concurrent writer in another
/// process can leave a half-written document. Writers within one process are
/// serialized; separate processes sharing the file can still lose each
/// other's updates, like any other whole-value store.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> StorageResult<Map<String, Value>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(Map::new()),
            Ok(bytes) => match serde_json::from_slice::<Value>(&bytes)? {
                Value::Object(map) => Ok(map),
                other => Err(StorageError::Unavailable(format!(
                    "{} does not hold a JSON object (found {})",
                    self.path.display(),
                    json_kind(&other)
                ))),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                trace!(path = %self.path.display(), "Store file missing, treating as empty");
                Ok(Map::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn persist(&self, map: Map<String, Value>) -> StorageResult<()> {
        let bytes = serde_json::to_vec(&Value::Object(map))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(format!(".{}.tmp", Uuid::new_v4()));
        let tmp = PathBuf::from(tmp);

        let written = match tokio::fs::write(&tmp, &bytes).await {
            Ok(()) => tokio::fs::rename(&tmp, &self.path).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        debug!(path = %self.path.display(), bytes = bytes.len(), "Persisted store file");
        Ok(())
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, keys: &[String]) -> StorageResult<HashMap<String, Value>> {
        let mut map = self.load().await?;
        Ok(keys
            .iter()
            .filter_map(|k| map.remove(k).map(|v| (k.clone(), v)))
            .collect())
    }

    async fn set(&self, items: HashMap<String, Value>) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut map = self.load().await?;
        map.extend(items);
        self.persist(map).await
    }

    async fn remove(&self, keys: &[String]) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut map = self.load().await?;
        let before = map.len();
        for key in keys {
            map.remove(key);
        }
        if map.len() == before {
            return Ok(());
        }
        self.persist(map).await
    }

    async fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.load().await?.keys().cloned().collect())
    }
}
