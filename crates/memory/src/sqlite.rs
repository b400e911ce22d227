//! SQLite backend — a single-file durable `KVStore`.
//!
//! One `kv` table keyed by the layout in `corvid_core::store::keys`;
//! range queries ride on the primary-key index. Pass `":memory:"` for an
//! in-process ephemeral database (useful for tests).

use async_trait::async_trait;
use corvid_core::error::StoreError;
use corvid_core::store::KVStore;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::info;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open the database at `path`, creating the file and schema if needed.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Unavailable(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to open SQLite: {e}")))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS kv (
                key   TEXT PRIMARY KEY,
                value BLOB NOT NULL
            )",
        )
        .execute(&pool)
        .await
        .map_err(|e| StoreError::Unavailable(format!("Schema creation failed: {e}")))?;

        info!("SQLite store initialized at {path}");
        Ok(Self { pool })
    }
}

fn escape_like(prefix: &str) -> String {
    prefix
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

#[async_trait]
impl KVStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Unavailable(format!("put failed: {e}")))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let row = sqlx::query("SELECT value FROM kv WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(format!("get failed: {e}")))?;
        Ok(row.map(|r| r.get::<Vec<u8>, _>(0)))
    }

    async fn range(
        &self,
        prefix: &str,
        from: &str,
        limit: usize,
    ) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let pattern = format!("{}%", escape_like(prefix));
        let limit = if limit == 0 { i64::MAX } else { limit as i64 };
        let rows = sqlx::query(
            "SELECT key, value FROM kv
             WHERE key LIKE ?1 ESCAPE '\\' AND key > ?2
             ORDER BY key LIMIT ?3",
        )
        .bind(&pattern)
        .bind(from)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Unavailable(format!("range failed: {e}")))?;
        Ok(rows
            .into_iter()
            .map(|r| (r.get::<String, _>(0), r.get::<Vec<u8>, _>(1)))
            .collect())
    }

    async fn delete(&self, prefix: &str) -> Result<usize, StoreError> {
        let pattern = format!("{}%", escape_like(prefix));
        let result = sqlx::query("DELETE FROM kv WHERE key LIKE ?1 ESCAPE '\\'")
            .bind(&pattern)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(format!("delete failed: {e}")))?;
        Ok(result.rows_affected() as usize)
    }

    async fn scan_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let pattern = format!("{}%", escape_like(prefix));
        let rows = sqlx::query("SELECT key FROM kv WHERE key LIKE ?1 ESCAPE '\\' ORDER BY key")
            .bind(&pattern)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(format!("scan failed: {e}")))?;
        Ok(rows.into_iter().map(|r| r.get::<String, _>(0)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn roundtrip_and_range() {
        let store = SqliteStore::open(":memory:").await.unwrap();
        store.put("s/a/msg/001", b"one".to_vec()).await.unwrap();
        store.put("s/a/msg/002", b"two".to_vec()).await.unwrap();
        store.put("s/b/msg/001", b"other".to_vec()).await.unwrap();

        assert_eq!(
            store.get("s/a/msg/001").await.unwrap(),
            Some(b"one".to_vec())
        );

        let range = store.range("s/a/", "", 0).await.unwrap();
        assert_eq!(range.len(), 2);
        assert_eq!(range[0].0, "s/a/msg/001");

        let after = store.range("s/a/", "s/a/msg/001", 0).await.unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].1, b"two");
    }

    #[tokio::test]
    async fn delete_counts_rows() {
        let store = SqliteStore::open(":memory:").await.unwrap();
        store.put("x/1", b"a".to_vec()).await.unwrap();
        store.put("x/2", b"b".to_vec()).await.unwrap();
        assert_eq!(store.delete("x/").await.unwrap(), 2);
        assert!(store.scan_keys("x/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn like_wildcards_escaped() {
        let store = SqliteStore::open(":memory:").await.unwrap();
        store.put("a%b/1", b"x".to_vec()).await.unwrap();
        store.put("aXb/1", b"y".to_vec()).await.unwrap();
        let keys = store.scan_keys("a%b/").await.unwrap();
        assert_eq!(keys, vec!["a%b/1"]);
    }
}
