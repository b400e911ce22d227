//! Store capability traits — the seam behind pluggable persistence.
//!
//! Every memory backend implements `KVStore`; every event backend
//! implements `StreamStore`. The routers hold the current backend behind
//! an atomic pointer and can hot-swap it at runtime, so nothing above
//! this seam knows which driver is live.

use crate::error::StoreError;
use crate::event::AgentEvent;
use async_trait::async_trait;

/// Ordered key-value storage.
///
/// Keys are UTF-8 strings; ordering is lexicographic byte order, which the
/// key layout below exploits (zero-padded message ids sort numerically).
#[async_trait]
pub trait KVStore: Send + Sync {
    /// The backend name (e.g., "in_memory", "file", "sqlite").
    fn name(&self) -> &str;

    /// Insert or overwrite a value.
    async fn put(&self, key: &str, value: Vec<u8>) -> std::result::Result<(), StoreError>;

    /// Fetch a value by exact key.
    async fn get(&self, key: &str) -> std::result::Result<Option<Vec<u8>>, StoreError>;

    /// Fetch up to `limit` entries with keys under `prefix`, strictly
    /// after `from` (pass "" to start at the beginning), in key order.
    /// `limit = 0` means no limit.
    async fn range(
        &self,
        prefix: &str,
        from: &str,
        limit: usize,
    ) -> std::result::Result<Vec<(String, Vec<u8>)>, StoreError>;

    /// Delete all entries with keys under `prefix`. Returns the count.
    async fn delete(&self, prefix: &str) -> std::result::Result<usize, StoreError>;

    /// List all keys under `prefix`, in key order.
    async fn scan_keys(&self, prefix: &str) -> std::result::Result<Vec<String>, StoreError>;
}

/// Append-only event streams.
#[async_trait]
pub trait StreamStore: Send + Sync {
    /// The backend name (e.g., "in_memory", "file").
    fn name(&self) -> &str;

    /// Append an event, assigning the next per-stream id. Returns the id.
    async fn append(
        &self,
        stream: &str,
        event: AgentEvent,
    ) -> std::result::Result<u64, StoreError>;

    /// Read up to `limit` events with ids strictly after `after_id`.
    /// `limit = 0` means no limit.
    async fn read(
        &self,
        stream: &str,
        after_id: u64,
        limit: usize,
    ) -> std::result::Result<Vec<AgentEvent>, StoreError>;

    /// The highest assigned id in the stream (0 if empty).
    async fn last_id(&self, stream: &str) -> std::result::Result<u64, StoreError>;

    /// List all stream names.
    async fn streams(&self) -> std::result::Result<Vec<String>, StoreError>;
}

/// Persisted key layout.
///
/// Sessions under `s/<session_id>/msg/<id>`, summaries under
/// `s/<session_id>/summary`, metrics under `a/<agent_id>/metrics`,
/// artifacts under `a/<agent_id>/art/<artifact_id>`. Event streams are
/// named `evt:<session_id>`.
pub mod keys {
    pub fn message(session_id: &str, id: u64) -> String {
        // Zero-padded so lexicographic key order is numeric id order.
        format!("s/{session_id}/msg/{id:012}")
    }

    pub fn message_prefix(session_id: &str) -> String {
        format!("s/{session_id}/msg/")
    }

    pub fn session_meta(session_id: &str) -> String {
        format!("s/{session_id}/meta")
    }

    pub fn session_prefix(session_id: &str) -> String {
        format!("s/{session_id}/")
    }

    pub fn all_sessions_prefix() -> &'static str {
        "s/"
    }

    pub fn summary(session_id: &str) -> String {
        format!("s/{session_id}/summary")
    }

    pub fn metrics(agent_id: &str) -> String {
        format!("a/{agent_id}/metrics")
    }

    pub fn artifact(agent_id: &str, artifact_id: &str) -> String {
        format!("a/{agent_id}/art/{artifact_id}")
    }

    pub fn event_stream(session_id: &str) -> String {
        format!("evt:{session_id}")
    }

    /// Extract the session id from a `s/<sid>/...` key.
    pub fn session_of(key: &str) -> Option<&str> {
        key.strip_prefix("s/")?.split('/').next()
    }

    /// Extract the message id from a `s/<sid>/msg/<id>` key.
    pub fn message_id_of(key: &str) -> Option<u64> {
        key.rsplit('/').next()?.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::keys;

    #[test]
    fn message_keys_sort_numerically() {
        let k9 = keys::message("s1", 9);
        let k10 = keys::message("s1", 10);
        let k100 = keys::message("s1", 100);
        assert!(k9 < k10);
        assert!(k10 < k100);
    }

    #[test]
    fn session_extraction() {
        let key = keys::message("abc-123", 7);
        assert_eq!(keys::session_of(&key), Some("abc-123"));
        assert_eq!(keys::message_id_of(&key), Some(7));
    }

    #[test]
    fn stream_naming() {
        assert_eq!(keys::event_stream("s1"), "evt:s1");
    }

    #[test]
    fn meta_not_under_message_prefix() {
        let meta = keys::session_meta("s1");
        assert!(!meta.starts_with(&keys::message_prefix("s1")));
        assert!(meta.starts_with(&keys::session_prefix("s1")));
    }
}
