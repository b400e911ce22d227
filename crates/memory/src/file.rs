//! File-based backend — persistent JSONL storage.
//!
//! Each line is a JSON record `{key, value}` with the value base64-encoded.
//! Entries are loaded into memory on open and the full map is flushed to
//! disk on every mutation. This gives fast reads with durable writes and a
//! human-inspectable file, at the cost of rewrite-on-mutate — fine for the
//! session sizes this store is meant for.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use corvid_core::error::StoreError;
use corvid_core::store::KVStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Serialize, Deserialize)]
struct Record {
    key: String,
    value: String,
}

/// A file-backed `KVStore` using JSONL (one record per line).
pub struct FileStore {
    path: PathBuf,
    entries: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl FileStore {
    /// Open (or create) the store at `path`, loading existing entries.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let mut entries = BTreeMap::new();

        if path.exists() {
            let raw = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| StoreError::Unavailable(format!("read {}: {e}", path.display())))?;
            for (lineno, line) in raw.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Record>(line) {
                    Ok(record) => match BASE64.decode(&record.value) {
                        Ok(value) => {
                            entries.insert(record.key, value);
                        }
                        Err(e) => warn!(lineno, "Skipping undecodable value: {e}"),
                    },
                    Err(e) => warn!(lineno, "Skipping malformed line: {e}"),
                }
            }
            debug!(count = entries.len(), path = %path.display(), "Loaded file store");
        } else if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Unavailable(format!("mkdir {}: {e}", parent.display())))?;
        }

        Ok(Self {
            path,
            entries: Arc::new(RwLock::new(entries)),
        })
    }

    async fn flush(&self, entries: &BTreeMap<String, Vec<u8>>) -> Result<(), StoreError> {
        let mut out = String::new();
        for (key, value) in entries {
            let record = Record {
                key: key.clone(),
                value: BASE64.encode(value),
            };
            out.push_str(&serde_json::to_string(&record).map_err(|e| {
                StoreError::Serialization(format!("encode record for {key}: {e}"))
            })?);
            out.push('\n');
        }
        tokio::fs::write(&self.path, out)
            .await
            .map_err(|e| StoreError::Unavailable(format!("write {}: {e}", self.path.display())))
    }
}

#[async_trait]
impl KVStore for FileStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), value);
        self.flush(&entries).await
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn range(
        &self,
        prefix: &str,
        from: &str,
        limit: usize,
    ) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let entries = self.entries.read().await;
        let mut out = Vec::new();
        for (key, value) in entries.range(prefix.to_string()..) {
            if !key.starts_with(prefix) {
                break;
            }
            if key.as_str() <= from {
                continue;
            }
            out.push((key.clone(), value.clone()));
            if limit > 0 && out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }

    async fn delete(&self, prefix: &str) -> Result<usize, StoreError> {
        let mut entries = self.entries.write().await;
        let keys: Vec<String> = entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &keys {
            entries.remove(key);
        }
        if !keys.is_empty() {
            self.flush(&entries).await?;
        }
        Ok(keys.len())
    }

    async fn scan_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let entries = self.entries.read().await;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}
