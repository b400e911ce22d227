//! Event router — fan-out of structured events to a hot-swappable stream
//! store.
//!
//! `emit` appends to the durable stream, mirrors into a bounded per-session
//! ring (drop-oldest non-critical on overflow, counted as backpressure) and
//! notifies live subscribers over a broadcast channel. `stream` yields a
//! restartable sequence: history after a caller-supplied cursor, then live
//! events. A backend switch leaves emitted events in the old store and
//! writes a `routing_handover` marker with a shared correlation id into
//! both streams so consumers can chain across the cut.

use corvid_core::error::{Error, StoreError};
use corvid_core::event::{AgentEvent, EventKind};
use corvid_core::store::{StreamStore, keys};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, RwLock, broadcast, mpsc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::file::FileStreamStore;
use crate::in_memory::InMemoryStreamStore;

/// Default bound of the per-session live buffer.
pub const DEFAULT_BUFFER_CAPACITY: usize = 1024;

/// Which stream backend is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventBackendKind {
    InMemory,
    File,
}

impl EventBackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InMemory => "in_memory",
            Self::File => "file",
        }
    }

    pub fn parse(s: &str) -> Result<Self, Error> {
        match s {
            "in_memory" => Ok(Self::InMemory),
            "file" => Ok(Self::File),
            other => Err(Error::Config {
                message: format!("Unknown event backend: {other}"),
            }),
        }
    }
}

/// Backend-specific settings for a switch.
#[derive(Debug, Clone, Default)]
pub struct EventBackendConfig {
    pub path: Option<String>,
}

struct Inner {
    store: Arc<dyn StreamStore>,
    kind: EventBackendKind,
}

pub struct EventRouter {
    inner: RwLock<Inner>,
    tx: broadcast::Sender<Arc<AgentEvent>>,
    buffers: Mutex<HashMap<String, VecDeque<AgentEvent>>>,
    buffer_capacity: usize,
    backpressure: AtomicU64,
}

async fn build_store(
    kind: EventBackendKind,
    config: &EventBackendConfig,
) -> Result<Arc<dyn StreamStore>, Error> {
    match kind {
        EventBackendKind::InMemory => Ok(Arc::new(InMemoryStreamStore::new())),
        EventBackendKind::File => {
            let path = config.path.clone().ok_or_else(|| Error::Config {
                message: "file event backend requires a path".into(),
            })?;
            Ok(Arc::new(FileStreamStore::open(path).await?))
        }
    }
}

impl EventRouter {
    pub fn in_memory() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self {
            inner: RwLock::new(Inner {
                store: Arc::new(InMemoryStreamStore::new()),
                kind: EventBackendKind::InMemory,
            }),
            tx,
            buffers: Mutex::new(HashMap::new()),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            backpressure: AtomicU64::new(0),
        }
    }

    pub async fn new(kind: EventBackendKind, config: EventBackendConfig) -> Result<Self, Error> {
        let store = build_store(kind, &config).await?;
        let (tx, _) = broadcast::channel(256);
        Ok(Self {
            inner: RwLock::new(Inner { store, kind }),
            tx,
            buffers: Mutex::new(HashMap::new()),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            backpressure: AtomicU64::new(0),
        })
    }

    /// Shrink the live buffer (tests exercise the overflow path with this).
    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity.max(1);
        self
    }

    pub async fn current_kind(&self) -> EventBackendKind {
        self.inner.read().await.kind
    }

    /// Events dropped from live buffers since creation.
    pub fn backpressure_count(&self) -> u64 {
        self.backpressure.load(Ordering::Relaxed)
    }

    /// Append an event to its session stream. Returns the assigned id.
    pub async fn emit(&self, event: AgentEvent) -> Result<u64, Error> {
        let stream = keys::event_stream(&event.session_id);
        let inner = self.inner.read().await;
        let id = inner.store.append(&stream, event.clone()).await?;
        drop(inner);

        let mut event = event;
        event.event_id = id;
        self.buffer_push(event.clone()).await;
        // No live subscribers is fine.
        let _ = self.tx.send(Arc::new(event));
        Ok(id)
    }

    async fn buffer_push(&self, event: AgentEvent) {
        let mut buffers = self.buffers.lock().await;
        let buffer = buffers.entry(event.session_id.clone()).or_default();
        if buffer.len() >= self.buffer_capacity {
            // Shed the oldest non-critical entry; critical events are
            // never dropped.
            if let Some(pos) = buffer.iter().position(|e| !e.kind.is_critical()) {
                buffer.remove(pos);
                self.backpressure.fetch_add(1, Ordering::Relaxed);
            }
        }
        buffer.push_back(event);
    }

    /// The newest buffered events for a session (most recent last).
    pub async fn recent(&self, session_id: &str, n: usize) -> Vec<AgentEvent> {
        let buffers = self.buffers.lock().await;
        let Some(buffer) = buffers.get(session_id) else {
            return Vec::new();
        };
        let skip = buffer.len().saturating_sub(n);
        buffer.iter().skip(skip).cloned().collect()
    }

    /// Read durable events after `after_id` from the live store.
    pub async fn read(
        &self,
        session_id: &str,
        after_id: u64,
        limit: usize,
    ) -> Result<Vec<AgentEvent>, Error> {
        let inner = self.inner.read().await;
        Ok(inner
            .store
            .read(&keys::event_stream(session_id), after_id, limit)
            .await?)
    }

    /// A lazy, restartable event sequence for one session.
    ///
    /// Yields stored events after `after_id` (or from the current tail
    /// when `None`), then live events as they are emitted. The sequence
    /// never terminates on its own; drop the receiver to stop.
    pub async fn stream(
        &self,
        session_id: &str,
        after_id: Option<u64>,
    ) -> mpsc::Receiver<AgentEvent> {
        let (out_tx, out_rx) = mpsc::channel(64);
        // Subscribe before the catch-up read so nothing falls between.
        let mut live = self.tx.subscribe();
        let store = self.inner.read().await.store.clone();
        let stream_name = keys::event_stream(session_id);
        let session = session_id.to_string();

        let start = match after_id {
            Some(id) => id,
            None => store.last_id(&stream_name).await.unwrap_or(0),
        };

        tokio::spawn(async move {
            let mut last_sent = start;

            if let Ok(history) = store.read(&stream_name, start, 0).await {
                for event in history {
                    last_sent = event.event_id;
                    if out_tx.send(event).await.is_err() {
                        return;
                    }
                }
            }

            loop {
                match live.recv().await {
                    Ok(event) => {
                        if event.session_id != session || event.event_id <= last_sent {
                            continue;
                        }
                        last_sent = event.event_id;
                        if out_tx.send((*event).clone()).await.is_err() {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!(lagged = n, "Event stream subscriber lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });

        out_rx
    }

    /// Switch to a new stream backend.
    ///
    /// Emitted events stay in the old store. A `routing_handover` marker
    /// with one correlation id is appended to every existing stream in
    /// both stores; if any marker cannot be written to the new store, the
    /// pointer is not flipped.
    pub async fn switch_events(
        &self,
        kind: EventBackendKind,
        config: EventBackendConfig,
    ) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        info!(from = guard.kind.as_str(), to = kind.as_str(), "Event store switch starting");

        let new_store = build_store(kind, &config).await?;
        let correlation_id = Uuid::new_v4().to_string();

        let streams = guard
            .store
            .streams()
            .await
            .map_err(|e| StoreError::MigrationFailed(format!("stream listing: {e}")))?;
        for stream in &streams {
            let session = stream.strip_prefix("evt:").unwrap_or(stream);
            let marker = |direction: &str| {
                AgentEvent::new(
                    session,
                    "",
                    EventKind::RoutingHandover,
                    serde_json::json!({
                        "correlation_id": correlation_id,
                        "direction": direction,
                        "from": guard.kind.as_str(),
                        "to": kind.as_str(),
                    }),
                )
            };
            new_store
                .append(stream, marker("incoming"))
                .await
                .map_err(|e| StoreError::MigrationFailed(format!("handover into {stream}: {e}")))?;
            guard
                .store
                .append(stream, marker("outgoing"))
                .await
                .map_err(|e| StoreError::MigrationFailed(format!("handover out of {stream}: {e}")))?;
        }

        guard.store = new_store;
        guard.kind = kind;
        info!(streams = streams.len(), "Event store switch complete");
        Ok(())
    }
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::in_memory()
    }
}
