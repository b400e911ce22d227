//! File-backed stream store — append-only JSONL.
//!
//! Each line is `{stream, event}`. Unlike the memory-side file store this
//! one never rewrites: appends go straight to the end of the file, which
//! matches the append-only contract of event streams.

use async_trait::async_trait;
use corvid_core::error::StoreError;
use corvid_core::event::AgentEvent;
use corvid_core::store::StreamStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Serialize, Deserialize)]
struct Line {
    stream: String,
    event: AgentEvent,
}

pub struct FileStreamStore {
    path: PathBuf,
    streams: Arc<RwLock<HashMap<String, Vec<AgentEvent>>>>,
}

impl FileStreamStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let mut streams: HashMap<String, Vec<AgentEvent>> = HashMap::new();

        if path.exists() {
            let raw = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| StoreError::Unavailable(format!("read {}: {e}", path.display())))?;
            for (lineno, line) in raw.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Line>(line) {
                    Ok(record) => streams.entry(record.stream).or_default().push(record.event),
                    Err(e) => warn!(lineno, "Skipping malformed event line: {e}"),
                }
            }
            debug!(streams = streams.len(), path = %path.display(), "Loaded event log");
        } else if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Unavailable(format!("mkdir {}: {e}", parent.display())))?;
        }

        Ok(Self {
            path,
            streams: Arc::new(RwLock::new(streams)),
        })
    }
}

#[async_trait]
impl StreamStore for FileStreamStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn append(&self, stream: &str, mut event: AgentEvent) -> Result<u64, StoreError> {
        let mut streams = self.streams.write().await;
        let entries = streams.entry(stream.to_string()).or_default();
        let id = entries.last().map(|e| e.event_id).unwrap_or(0) + 1;
        event.event_id = id;

        let line = serde_json::to_string(&Line {
            stream: stream.to_string(),
            event: event.clone(),
        })
        .map_err(|e| StoreError::Serialization(format!("encode event: {e}")))?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| StoreError::Unavailable(format!("open {}: {e}", self.path.display())))?;
        file.write_all(format!("{line}\n").as_bytes())
            .await
            .map_err(|e| StoreError::Unavailable(format!("append {}: {e}", self.path.display())))?;

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

#[cfg(test)]
mod tests {
    use super::*;
    use corvid_core::event::EventKind;

    #[tokio::test]
    async fn appends_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");

        {
            let store = FileStreamStore::open(&path).await.unwrap();
            for _ in 0..3 {
                store
                    .append(
                        "evt:s1",
                        AgentEvent::new("s1", "a1", EventKind::AgentThought, serde_json::Value::Null),
                    )
                    .await
                    .unwrap();
            }
        }

        let reopened = FileStreamStore::open(&path).await.unwrap();
        let events = reopened.read("evt:s1", 0, 0).await.unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[2].event_id, 3);
        assert_eq!(reopened.last_id("evt:s1").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn ids_continue_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");

        {
            let store = FileStreamStore::open(&path).await.unwrap();
            store
                .append(
                    "evt:s1",
                    AgentEvent::new("s1", "a1", EventKind::UserMessage, serde_json::Value::Null),
                )
                .await
                .unwrap();
        }

        let store = FileStreamStore::open(&path).await.unwrap();
        let id = store
            .append(
                "evt:s1",
                AgentEvent::new("s1", "a1", EventKind::FinalAnswer, serde_json::Value::Null),
            )
            .await
            .unwrap();
        assert_eq!(id, 2);
    }
}
