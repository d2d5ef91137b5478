use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::Mutex;

/// Well-known key holding the full serialized profile list.
pub const PROFILES_KEY: &str = "profiles";

/// Key/value persistence boundary.
///
/// The engine stores two kinds of entries: the full profile list under
/// [`PROFILES_KEY`], and packed manifest records under their content-hash
/// keys. Concurrent access to independent keys is assumed safe; no cross-key
/// transaction is ever used.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn set_raw(&self, key: &str, value: Vec<u8>) -> Result<()>;
}

/// Fetch and deserialize a JSON value, `None` when the key is absent.
pub async fn get_json<T: DeserializeOwned>(store: &dyn KvStore, key: &str) -> Result<Option<T>> {
    match store.get_raw(key).await? {
        Some(bytes) => {
            let value = serde_json::from_slice(&bytes)
                .with_context(|| format!("Parse stored value for key \"{}\"", key))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

/// Serialize and store a JSON value.
pub async fn set_json<T: Serialize + Sync>(
    store: &dyn KvStore,
    key: &str,
    value: &T,
) -> Result<()> {
    let bytes = serde_json::to_vec(value)
        .with_context(|| format!("Serialize value for key \"{}\"", key))?;
    store.set_raw(key, bytes).await
}

/// File-backed store keeping one JSON document per key.
///
/// Hash-shaped keys fan out into `blobs/<first two chars>/` subdirectories;
/// everything else lands directly under the root.
#[derive(Debug)]
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn key_path(&self, key: &str) -> PathBuf {
        if is_hash_key(key) {
            self.root
                .join("blobs")
                .join(&key[..2])
                .join(format!("{}.json", key))
        } else {
            self.root.join(format!("{}.json", key))
        }
    }
}

fn is_hash_key(key: &str) -> bool {
    key.len() == 64 && key.bytes().all(|b| b.is_ascii_hexdigit())
}

#[async_trait]
impl KvStore for JsonFileStore {
    async fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.key_path(key);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path)
            .await
            .with_context(|| format!("Read store entry {:?}", path))?;
        Ok(Some(bytes))
    }

    async fn set_raw(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let path = self.key_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Create store directory {:?}", parent))?;
        }
        fs::write(&path, value)
            .await
            .with_context(|| format!("Write store entry {:?}", path))?;
        Ok(())
    }
}

/// In-memory store, used by tests and throwaway registries.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.entries.lock().await.contains_key(key)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set_raw(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.entries.lock().await.insert(key.to_string(), value);
        Ok(())
    }
}
