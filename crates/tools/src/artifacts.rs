//! Artifact store — content-addressed side storage for offloaded tool
//! outputs.
//!
//! Ids are sha-256 content hashes, so storing the same payload twice is a
//! no-op that returns the existing handle. The prompt only ever carries
//! the preview; the full content is retrievable on demand through the
//! builtin artifact tools.

use chrono::Utc;
use corvid_core::config::OffloadConfig;
use corvid_core::error::Error;
use corvid_core::token;
use corvid_core::tool::ArtifactRef;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::debug;

/// Search hits are capped to keep responses prompt-sized.
pub const MAX_SEARCH_HITS: usize = 100;

/// Marker appended to truncated previews.
pub const ELLIPSIS: &str = "…";

/// One substring match inside an artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    /// Byte offset of the match
    pub offset: usize,
    /// 1-based line number
    pub line: usize,
    /// The matching line's text
    pub text: String,
}

/// Aggregate numbers for `list`-style reporting.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ArtifactStats {
    pub count: usize,
    pub total_bytes: usize,
}

struct Stored {
    meta: ArtifactRef,
    bytes: Vec<u8>,
}

pub struct ArtifactStore {
    config: OffloadConfig,
    entries: RwLock<HashMap<String, Stored>>,
}

impl ArtifactStore {
    pub fn new(config: OffloadConfig) -> Self {
        Self {
            config,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &OffloadConfig {
        &self.config
    }

    /// Whether this payload should leave the prompt.
    pub fn should_offload(&self, bytes: &[u8]) -> bool {
        self.config.enabled
            && (token::estimate_bytes_tokens(bytes) > self.config.threshold_tokens
                || bytes.len() > self.config.threshold_bytes)
    }

    /// Store a payload. Idempotent under content hash.
    pub async fn put(
        &self,
        session_id: &str,
        bytes: Vec<u8>,
        mime_hint: Option<String>,
    ) -> Result<ArtifactRef, Error> {
        let artifact_id = format!("{:x}", Sha256::digest(&bytes));

        {
            let entries = self.entries.read().await;
            if let Some(existing) = entries.get(&artifact_id) {
                return Ok(existing.meta.clone());
            }
        }

        let text = String::from_utf8_lossy(&bytes);
        let preview = make_preview(
            &text,
            self.config.max_preview_tokens,
            self.config.max_preview_lines,
        );

        let meta = ArtifactRef {
            artifact_id: artifact_id.clone(),
            session_id: session_id.to_string(),
            created_at: Utc::now(),
            size_bytes: bytes.len(),
            // The prompt-side cost of an artifact is its preview budget,
            // independent of actual content size.
            token_estimate: self.config.max_preview_tokens,
            preview,
            mime_hint,
        };

        if let Some(dir) = &self.config.storage_dir {
            let dir = PathBuf::from(dir);
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| Error::Internal(format!("artifact dir {}: {e}", dir.display())))?;
            tokio::fs::write(dir.join(&artifact_id), &bytes)
                .await
                .map_err(|e| Error::Internal(format!("artifact write: {e}")))?;
        }

        debug!(artifact = %artifact_id, bytes = bytes.len(), "Stored artifact");
        self.entries
            .write()
            .await
            .insert(artifact_id, Stored { meta: meta.clone(), bytes });
        Ok(meta)
    }

    /// Full content by id.
    pub async fn read(&self, artifact_id: &str) -> Result<Vec<u8>, Error> {
        if let Some(stored) = self.entries.read().await.get(artifact_id) {
            return Ok(stored.bytes.clone());
        }
        if let Some(dir) = &self.config.storage_dir {
            let path = PathBuf::from(dir).join(artifact_id);
            if path.exists() {
                return tokio::fs::read(&path)
                    .await
                    .map_err(|e| Error::Internal(format!("artifact read: {e}")));
            }
        }
        Err(Error::Internal(format!("unknown artifact: {artifact_id}")))
    }

    /// The last `n_lines` lines of the content.
    pub async fn tail(&self, artifact_id: &str, n_lines: usize) -> Result<String, Error> {
        let bytes = self.read(artifact_id).await?;
        let text = String::from_utf8_lossy(&bytes);
        let lines: Vec<&str> = text.lines().collect();
        let skip = lines.len().saturating_sub(n_lines);
        Ok(lines[skip..].join("\n"))
    }

    /// Case-insensitive substring search, capped at [`MAX_SEARCH_HITS`].
    pub async fn search(&self, artifact_id: &str, query: &str) -> Result<Vec<SearchHit>, Error> {
        let bytes = self.read(artifact_id).await?;
        let text = String::from_utf8_lossy(&bytes);
        let needle = query.to_lowercase();

        let mut hits = Vec::new();
        let mut offset = 0;
        for (lineno, line) in text.lines().enumerate() {
            if line.to_lowercase().contains(&needle) {
                hits.push(SearchHit {
                    offset,
                    line: lineno + 1,
                    text: line.to_string(),
                });
                if hits.len() >= MAX_SEARCH_HITS {
                    break;
                }
            }
            offset += line.len() + 1;
        }
        Ok(hits)
    }

    /// Handles for a session (or everything), oldest first.
    pub async fn list(&self, session_id: Option<&str>) -> Vec<ArtifactRef> {
        let entries = self.entries.read().await;
        let mut refs: Vec<ArtifactRef> = entries
            .values()
            .filter(|s| session_id.is_none_or(|sid| s.meta.session_id == sid))
            .map(|s| s.meta.clone())
            .collect();
        refs.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.artifact_id.cmp(&b.artifact_id))
        });
        refs
    }

    pub async fn stats(&self, session_id: Option<&str>) -> ArtifactStats {
        let refs = self.list(session_id).await;
        ArtifactStats {
            count: refs.len(),
            total_bytes: refs.iter().map(|r| r.size_bytes).sum(),
        }
    }

    /// Drop artifacts older than `retention_days`. Returns the count.
    pub async fn cleanup_expired(&self) -> usize {
        let cutoff = Utc::now() - chrono::Duration::days(self.config.retention_days as i64);
        let mut entries = self.entries.write().await;
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, s)| s.meta.created_at < cutoff)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            entries.remove(id);
            if let Some(dir) = &self.config.storage_dir {
                let _ = std::fs::remove_file(PathBuf::from(dir).join(id));
            }
        }
        expired.len()
    }
}

/// Newline-aware preview: whole lines while both the token and line
/// budgets hold, with an ellipsis marker when anything was cut. An
/// oversized first line is sliced to the token budget.
fn make_preview(text: &str, max_tokens: usize, max_lines: usize) -> String {
    let mut out = String::new();
    let mut lines_used = 0;
    let mut truncated = false;

    for line in text.lines() {
        if lines_used >= max_lines {
            truncated = true;
            break;
        }
        let candidate_len = out.len() + line.len() + usize::from(!out.is_empty());
        if candidate_len.div_ceil(4) > max_tokens {
            if out.is_empty() {
                // Single line longer than the whole budget.
                let cut = max_tokens.saturating_mul(4).min(line.len());
                let cut = (0..=cut).rev().find(|i| line.is_char_boundary(*i)).unwrap_or(0);
                out.push_str(&line[..cut]);
            }
            truncated = true;
            break;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(line);
        lines_used += 1;
    }

    if text.lines().count() > lines_used {
        truncated = true;
    }
    if truncated {
        out.push_str(ELLIPSIS);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(enabled: bool) -> ArtifactStore {
        ArtifactStore::new(OffloadConfig {
            enabled,
            ..OffloadConfig::default()
        })
    }

    #[tokio::test]
    async fn put_then_read_roundtrips() {
        let store = store(true);
        let payload = b"line one\nline two\nline three".to_vec();
        let meta = store.put("s1", payload.clone(), None).await.unwrap();
        assert_eq!(store.read(&meta.artifact_id).await.unwrap(), payload);
        assert_eq!(meta.size_bytes, payload.len());
    }

    #[tokio::test]
    async fn put_is_idempotent_under_content_hash() {
        let store = store(true);
        let a = store.put("s1", b"same bytes".to_vec(), None).await.unwrap();
        let b = store.put("s1", b"same bytes".to_vec(), None).await.unwrap();
        assert_eq!(a.artifact_id, b.artifact_id);
        assert_eq!(store.stats(None).await.count, 1);
    }

    #[tokio::test]
    async fn token_estimate_is_preview_budget() {
        let mut config = OffloadConfig::default();
        config.enabled = true;
        config.max_preview_tokens = 50;
        let store = ArtifactStore::new(config);

        let big = "x".repeat(40_000);
        let meta = store.put("s1", big.into_bytes(), None).await.unwrap();
        assert_eq!(meta.token_estimate, 50);
        // Preview is within the budget (plus the ellipsis marker).
        assert!(corvid_core::token::estimate_tokens(&meta.preview) <= 51);
        assert!(meta.preview.ends_with(ELLIPSIS));
    }

    #[tokio::test]
    async fn preview_is_newline_aware() {
        let mut config = OffloadConfig::default();
        config.enabled = true;
        config.max_preview_lines = 2;
        let store = ArtifactStore::new(config);

        let meta = store
            .put("s1", b"alpha\nbeta\ngamma\ndelta".to_vec(), None)
            .await
            .unwrap();
        assert_eq!(meta.preview, format!("alpha\nbeta{ELLIPSIS}"));
    }

    #[tokio::test]
    async fn short_payload_preview_not_truncated() {
        let store = store(true);
        let meta = store.put("s1", b"tiny".to_vec(), None).await.unwrap();
        assert_eq!(meta.preview, "tiny");
    }

    #[tokio::test]
    async fn should_offload_honors_both_thresholds() {
        let mut config = OffloadConfig::default();
        config.enabled = true;
        config.threshold_tokens = 500;
        config.threshold_bytes = 100;
        let store = ArtifactStore::new(config);

        assert!(!store.should_offload(b"small"));
        // Over the byte threshold, under the token one.
        assert!(store.should_offload(&vec![b'x'; 150]));
        // Over the token threshold.
        assert!(store.should_offload(&vec![b'x'; 3000]));

        let disabled = ArtifactStore::new(OffloadConfig::default());
        assert!(!disabled.should_offload(&vec![b'x'; 10_000]));
    }

    #[tokio::test]
    async fn tail_returns_last_lines() {
        let store = store(true);
        let meta = store
            .put("s1", b"1\n2\n3\n4\n5".to_vec(), None)
            .await
            .unwrap();
        assert_eq!(store.tail(&meta.artifact_id, 2).await.unwrap(), "4\n5");
        assert_eq!(store.tail(&meta.artifact_id, 99).await.unwrap(), "1\n2\n3\n4\n5");
    }

    #[tokio::test]
    async fn search_is_case_insensitive_with_positions() {
        let store = store(true);
        let meta = store
            .put("s1", b"Alpha\nnothing\nALPHA again".to_vec(), None)
            .await
            .unwrap();
        let hits = store.search(&meta.artifact_id, "alpha").await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].line, 1);
        assert_eq!(hits[0].offset, 0);
        assert_eq!(hits[1].line, 3);
        assert_eq!(hits[1].text, "ALPHA again");
    }

    #[tokio::test]
    async fn search_caps_hits() {
        let store = store(true);
        let body = "match\n".repeat(300);
        let meta = store.put("s1", body.into_bytes(), None).await.unwrap();
        let hits = store.search(&meta.artifact_id, "match").await.unwrap();
        assert_eq!(hits.len(), MAX_SEARCH_HITS);
    }

    #[tokio::test]
    async fn list_scoped_by_session() {
        let store = store(true);
        store.put("s1", b"one".to_vec(), None).await.unwrap();
        store.put("s1", b"two".to_vec(), None).await.unwrap();
        store.put("s2", b"three".to_vec(), None).await.unwrap();

        assert_eq!(store.list(Some("s1")).await.len(), 2);
        assert_eq!(store.list(Some("s2")).await.len(), 1);
        assert_eq!(store.list(None).await.len(), 3);
    }

    #[tokio::test]
    async fn disk_mirror_written_and_readable() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = OffloadConfig::default();
        config.enabled = true;
        config.storage_dir = Some(dir.path().display().to_string());
        let store = ArtifactStore::new(config);

        let meta = store.put("s1", b"on disk too".to_vec(), None).await.unwrap();
        let on_disk = dir.path().join(&meta.artifact_id);
        assert!(on_disk.exists());
        assert_eq!(std::fs::read(on_disk).unwrap(), b"on disk too");
    }
}
