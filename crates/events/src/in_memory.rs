//! In-memory stream store — per-stream vectors with assigned ids.

use async_trait::async_trait;
use corvid_core::error::StoreError;
use corvid_core::event::AgentEvent;
use corvid_core::store::StreamStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub struct InMemoryStreamStore {
    streams: Arc<RwLock<HashMap<String, Vec<AgentEvent>>>>,
}

impl InMemoryStreamStore {
    pub fn new() -> Self {
        Self {
            streams: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryStreamStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StreamStore for InMemoryStreamStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn append(&self, stream: &str, mut event: AgentEvent) -> Result<u64, StoreError> {
        let mut streams = self.streams.write().await;
        let entries = streams.entry(stream.to_string()).or_default();
        let id = entries.last().map(|e| e.event_id).unwrap_or(0) + 1;
        event.event_id = id;
        entries.push(event);
        Ok(id)
    }

    async fn read(
        &self,
        stream: &str,
        after_id: u64,
        limit: usize,
    ) -> Result<Vec<AgentEvent>, StoreError> {
        let streams = self.streams.read().await;
        let Some(entries) = streams.get(stream) else {
            return Ok(Vec::new());
        };
        let mut out: Vec<AgentEvent> = entries
            .iter()
            .filter(|e| e.event_id > after_id)
            .cloned()
            .collect();
        if limit > 0 && out.len() > limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    async fn last_id(&self, stream: &str) -> Result<u64, StoreError> {
        let streams = self.streams.read().await;
        Ok(streams
            .get(stream)
            .and_then(|entries| entries.last())
            .map(|e| e.event_id)
            .unwrap_or(0))
    }

    async fn streams(&self) -> Result<Vec<String>, StoreError> {
        let streams = self.streams.read().await;
        let mut names: Vec<String> = streams.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}
