//! In-memory backend — useful for testing and ephemeral sessions.

use async_trait::async_trait;
use corvid_core::error::StoreError;
use corvid_core::store::KVStore;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A `KVStore` over a sorted map. Range queries fall out of the
/// BTreeMap's key order for free.
pub struct InMemoryStore {
    entries: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KVStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
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
