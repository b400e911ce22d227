//! Memory router — hot-swappable session storage.
//!
//! The router owns the current `KVStore` behind a single `RwLock`:
//! readers and appenders share the lock, `switch_memory_store` takes it
//! exclusively for the whole copy-then-flip, so in-flight appends block
//! during a handover and no message can land in a store that is about to
//! stop being authoritative. If the bulk copy fails, the pointer is not
//! flipped and the old store remains live.

use corvid_core::config::MemoryConfig;
use corvid_core::error::{Error, StoreError};
use corvid_core::message::{Message, Session, SessionId};
use corvid_core::store::{KVStore, keys};
use corvid_core::token;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::file::FileStore;
use crate::in_memory::InMemoryStore;

/// Which backend variant is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryKind {
    InMemory,
    File,
    #[cfg(feature = "sqlite")]
    Sqlite,
}

impl MemoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InMemory => "in_memory",
            Self::File => "file",
            #[cfg(feature = "sqlite")]
            Self::Sqlite => "sqlite",
        }
    }

    pub fn parse(s: &str) -> Result<Self, Error> {
        match s {
            "in_memory" => Ok(Self::InMemory),
            "file" => Ok(Self::File),
            #[cfg(feature = "sqlite")]
            "sqlite" => Ok(Self::Sqlite),
            other => Err(Error::Config {
                message: format!("Unknown memory backend: {other}"),
            }),
        }
    }
}

/// Backend-specific settings for a switch.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackendConfig {
    /// Storage path for file/sqlite backends
    pub path: Option<String>,
}

/// Filter for `load`.
#[derive(Debug, Clone, Copy)]
pub struct HistoryFilter {
    /// Only messages not superseded by a summary
    pub active_only: bool,
    /// 0 = no limit
    pub limit: usize,
}

impl Default for HistoryFilter {
    fn default() -> Self {
        Self {
            active_only: true,
            limit: 0,
        }
    }
}

impl HistoryFilter {
    pub fn all() -> Self {
        Self {
            active_only: false,
            limit: 0,
        }
    }
}

struct Inner {
    store: Arc<dyn KVStore>,
    kind: MemoryKind,
}

/// The memory router.
pub struct MemoryRouter {
    inner: RwLock<Inner>,
    /// Next message id per session, lazily seeded from the store
    seqs: Mutex<HashMap<String, u64>>,
    /// Router-level memory config, settable at runtime
    memory_config: std::sync::RwLock<MemoryConfig>,
}

async fn build_store(
    kind: MemoryKind,
    config: &MemoryBackendConfig,
) -> Result<Arc<dyn KVStore>, Error> {
    match kind {
        MemoryKind::InMemory => Ok(Arc::new(InMemoryStore::new())),
        MemoryKind::File => {
            let path = config.path.clone().ok_or_else(|| Error::Config {
                message: "file backend requires a path".into(),
            })?;
            Ok(Arc::new(FileStore::open(path).await?))
        }
        #[cfg(feature = "sqlite")]
        MemoryKind::Sqlite => {
            let path = config.path.clone().ok_or_else(|| Error::Config {
                message: "sqlite backend requires a path".into(),
            })?;
            Ok(Arc::new(crate::sqlite::SqliteStore::open(&path).await?))
        }
    }
}

impl MemoryRouter {
    /// Create a router over a fresh in-memory store.
    pub fn in_memory() -> Self {
        Self {
            inner: RwLock::new(Inner {
                store: Arc::new(InMemoryStore::new()),
                kind: MemoryKind::InMemory,
            }),
            seqs: Mutex::new(HashMap::new()),
            memory_config: std::sync::RwLock::new(MemoryConfig::default()),
        }
    }

    /// Create a router over the given backend.
    pub async fn new(kind: MemoryKind, config: MemoryBackendConfig) -> Result<Self, Error> {
        let store = build_store(kind, &config).await?;
        Ok(Self {
            inner: RwLock::new(Inner { store, kind }),
            seqs: Mutex::new(HashMap::new()),
            memory_config: std::sync::RwLock::new(MemoryConfig::default()),
        })
    }

    /// The kind of the live backend.
    pub async fn current_kind(&self) -> MemoryKind {
        self.inner.read().await.kind
    }

    /// Update the router-level memory config. The mode string is
    /// validated here so a typo fails fast instead of silently running
    /// with defaults.
    pub fn set_memory_config(&self, mode: &str, value: usize) -> Result<(), Error> {
        let mode = match mode {
            "sliding_window" => corvid_core::config::BudgetMode::SlidingWindow,
            "token_budget" => corvid_core::config::BudgetMode::TokenBudget,
            other => {
                return Err(Error::Config {
                    message: format!("Unknown memory mode: {other}"),
                });
            }
        };
        let mut config = self.memory_config.write().unwrap();
        config.mode = mode;
        config.value = value;
        Ok(())
    }

    pub fn memory_config(&self) -> MemoryConfig {
        self.memory_config.read().unwrap().clone()
    }

    /// Append a message, assigning the next id in its session.
    ///
    /// Returns the message with `id` filled in. Session bookkeeping
    /// (`last_activity`, token total) is updated in the same call.
    pub async fn append(&self, agent_id: &str, mut msg: Message) -> Result<Message, Error> {
        let inner = self.inner.read().await;
        let session_key = msg.session_id.0.clone();

        let id = {
            let mut seqs = self.seqs.lock().await;
            let next = match seqs.get(&session_key) {
                Some(n) => *n,
                None => last_message_id(inner.store.as_ref(), &session_key).await? + 1,
            };
            seqs.insert(session_key.clone(), next + 1);
            next
        };
        msg.id = id;

        let bytes = serde_json::to_vec(&msg)?;
        inner
            .store
            .put(&keys::message(&session_key, id), bytes)
            .await?;

        // Session bookkeeping
        let mut session = match self.session_meta_with(&inner, &msg.session_id).await? {
            Some(existing) => existing,
            None => Session::new(msg.session_id.clone(), agent_id),
        };
        session.last_activity = msg.created_at;
        session.total_tokens_estimate += msg.token_estimate;
        inner
            .store
            .put(
                &keys::session_meta(&session_key),
                serde_json::to_vec(&session)?,
            )
            .await?;

        debug!(session = %session_key, id, role = ?msg.role, "Appended message");
        Ok(msg)
    }

    /// Load a session's messages in `(created_at, id)` order.
    pub async fn load(
        &self,
        session_id: &SessionId,
        filter: HistoryFilter,
    ) -> Result<Vec<Message>, Error> {
        let inner = self.inner.read().await;
        let entries = inner
            .store
            .range(&keys::message_prefix(&session_id.0), "", 0)
            .await?;

        let mut messages = Vec::with_capacity(entries.len());
        for (key, bytes) in entries {
            match serde_json::from_slice::<Message>(&bytes) {
                Ok(msg) => {
                    if !filter.active_only || msg.active {
                        messages.push(msg);
                    }
                }
                Err(e) => warn!(key, "Skipping undecodable message: {e}"),
            }
        }
        if filter.limit > 0 && messages.len() > filter.limit {
            let skip = messages.len() - filter.limit;
            messages.drain(..skip);
        }
        Ok(messages)
    }

    /// Flip the `active` flag on the given messages.
    pub async fn update_active(
        &self,
        session_id: &SessionId,
        ids: &[u64],
        active: bool,
    ) -> Result<usize, Error> {
        let inner = self.inner.read().await;
        let mut updated = 0;
        for &id in ids {
            let key = keys::message(&session_id.0, id);
            let Some(bytes) = inner.store.get(&key).await? else {
                continue;
            };
            let mut msg: Message = serde_json::from_slice(&bytes)?;
            if msg.active != active {
                msg.active = active;
                inner.store.put(&key, serde_json::to_vec(&msg)?).await?;
                updated += 1;
            }
        }
        Ok(updated)
    }

    /// Remove the given messages entirely (retention policy `delete`).
    pub async fn delete_messages(
        &self,
        session_id: &SessionId,
        ids: &[u64],
    ) -> Result<usize, Error> {
        let inner = self.inner.read().await;
        let mut removed = 0;
        for &id in ids {
            removed += inner
                .store
                .delete(&keys::message(&session_id.0, id))
                .await?;
        }
        Ok(removed)
    }

    /// Session bookkeeping record, if the session exists.
    pub async fn session_meta(&self, session_id: &SessionId) -> Result<Option<Session>, Error> {
        let inner = self.inner.read().await;
        self.session_meta_with(&inner, session_id).await
    }

    async fn session_meta_with(
        &self,
        inner: &Inner,
        session_id: &SessionId,
    ) -> Result<Option<Session>, Error> {
        let bytes = inner.store.get(&keys::session_meta(&session_id.0)).await?;
        match bytes {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Persist an updated session record.
    pub async fn put_session_meta(&self, session: &Session) -> Result<(), Error> {
        let inner = self.inner.read().await;
        inner
            .store
            .put(
                &keys::session_meta(&session.session_id.0),
                serde_json::to_vec(session)?,
            )
            .await?;
        Ok(())
    }

    /// Recompute a session's active-view token total from the store.
    pub async fn refresh_session_totals(&self, session_id: &SessionId) -> Result<(), Error> {
        let active = self.load(session_id, HistoryFilter::default()).await?;
        let total = active.iter().map(|m| token::estimate_tokens(&m.content)).sum();
        if let Some(mut session) = self.session_meta(session_id).await? {
            session.total_tokens_estimate = total;
            self.put_session_meta(&session).await?;
        }
        Ok(())
    }

    /// Clear one session, or everything when `session_id` is `None`.
    pub async fn clear(&self, session_id: Option<&SessionId>) -> Result<usize, Error> {
        let inner = self.inner.read().await;
        let removed = match session_id {
            Some(sid) => {
                self.seqs.lock().await.remove(&sid.0);
                inner.store.delete(&keys::session_prefix(&sid.0)).await?
            }
            None => {
                self.seqs.lock().await.clear();
                inner.store.delete(keys::all_sessions_prefix()).await?
            }
        };
        Ok(removed)
    }

    /// Raw access for non-message state (metrics snapshots, artifacts).
    pub async fn put_blob(&self, key: &str, bytes: Vec<u8>) -> Result<(), Error> {
        let inner = self.inner.read().await;
        inner.store.put(key, bytes).await?;
        Ok(())
    }

    pub async fn get_blob(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        let inner = self.inner.read().await;
        Ok(inner.store.get(key).await?)
    }

    /// Switch to a new backend, migrating all state.
    ///
    /// Two-phase: while holding the write lock, every key is copied into
    /// the freshly built store, then the pointer is flipped. Any failure
    /// before the flip leaves the old store authoritative and surfaces as
    /// `migration_failed`.
    pub async fn switch_memory_store(
        &self,
        kind: MemoryKind,
        config: MemoryBackendConfig,
    ) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        info!(from = guard.kind.as_str(), to = kind.as_str(), "Memory store switch starting");

        let new_store = build_store(kind, &config).await?;

        let all_keys = guard
            .store
            .scan_keys("")
            .await
            .map_err(|e| StoreError::MigrationFailed(format!("snapshot failed: {e}")))?;
        for key in &all_keys {
            let value = guard
                .store
                .get(key)
                .await
                .map_err(|e| StoreError::MigrationFailed(format!("read {key}: {e}")))?
                .ok_or_else(|| {
                    StoreError::MigrationFailed(format!("key vanished during copy: {key}"))
                })?;
            new_store
                .put(key, value)
                .await
                .map_err(|e| StoreError::MigrationFailed(format!("write {key}: {e}")))?;
        }

        guard.store = new_store;
        guard.kind = kind;
        info!(migrated = all_keys.len(), "Memory store switch complete");
        Ok(())
    }
}

async fn last_message_id(store: &dyn KVStore, session: &str) -> Result<u64, Error> {
    let message_keys = store.scan_keys(&keys::message_prefix(session)).await?;
    Ok(message_keys
        .last()
        .and_then(|k| keys::message_id_of(k))
        .unwrap_or(0))
}
