use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use thiserror::Error;

mod animations;
mod pixels;
mod presets;
mod schedules;
mod simple;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("corrupt stored value: {0}")]
    Corrupt(String),
    #[error("database error: {0}")]
    Io(#[from] sqlx::Error),
}

impl StoreError {
    fn corrupt(reason: impl std::fmt::Display) -> Self {
        StoreError::Corrupt(reason.to_string())
    }
}

/// Fixed key layout of the persistent state.
///
/// External tooling depends on these exact bytes; do not change them.
pub(crate) mod keys {
    pub const COLOR: &[u8] = b"color";
    pub const BRIGHTNESS: &[u8] = b"brightness";
    pub const STATE: &[u8] = b"state";
    pub const PIXEL_MODE: &[u8] = b"pixel-mode";
    pub const CURRENT_ANIMATION: &[u8] = b"current-animation";

    pub const ANIMATION_PREFIX: &[u8] = b"animation-";
    pub const PRESET_PREFIX: &[u8] = b"preset-";
    pub const SCHEDULE_PREFIX: &[u8] = b"schedule-";

    /// Key of pixel `i`: `'p'` followed by the index in little-endian
    pub fn pixel(index: u16) -> [u8; 3] {
        let le = index.to_le_bytes();
        [b'p', le[0], le[1]]
    }

    /// Key of an entity record: prefix followed by the raw id bytes
    pub fn entity(prefix: &[u8], id: &str) -> Vec<u8> {
        let mut key = prefix.to_vec();
        key.extend_from_slice(id.as_bytes());
        key
    }
}

/// Ordered key-value persistence for the strip state.
///
/// Keys compare byte-lexicographically. Reads see a consistent snapshot and
/// writes are serialised, so multi-key updates are atomic from the rest of
/// the system's point of view.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    length: u16,
}

impl Store {
    /// Open (or create) the database at the given path
    pub async fn open(path: &Path, length: u16) -> Result<Store, StoreError> {
        debug!(path = %path.display(), "opening database");

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;

        Self::from_pool(pool, length).await
    }

    /// An in-memory store for tests
    pub async fn open_in_memory(length: u16) -> Result<Store, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        Self::from_pool(pool, length).await
    }

    async fn from_pool(pool: SqlitePool, length: u16) -> Result<Store, StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS kv (key BLOB PRIMARY KEY, value BLOB NOT NULL) WITHOUT ROWID",
        )
        .execute(&pool)
        .await?;

        Ok(Store { pool, length })
    }

    /// The configured pixel count, immutable after open
    pub fn length(&self) -> u16 {
        self.length
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn get_raw(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let row = sqlx::query("SELECT value FROM kv WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| row.get("value")))
    }

    async fn put_raw(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        sqlx::query("INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)")
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn delete_raw(&self, key: &[u8]) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM kv WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// All values stored under the prefix, in key order
    async fn list_raw(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>, StoreError> {
        let upper = prefix_upper_bound(prefix);
        let rows = sqlx::query("SELECT value FROM kv WHERE key >= ?1 AND key < ?2 ORDER BY key")
            .bind(prefix)
            .bind(&upper)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(|row| row.get("value")).collect())
    }

    async fn get_record<T: DeserializeOwned>(&self, key: &[u8]) -> Result<T, StoreError> {
        let raw = self.get_raw(key).await?.ok_or(StoreError::NotFound)?;
        serde_json::from_slice(&raw).map_err(StoreError::corrupt)
    }

    async fn put_record<T: Serialize>(&self, key: &[u8], record: &T) -> Result<(), StoreError> {
        let encoded = serde_json::to_vec(record).map_err(StoreError::corrupt)?;
        self.put_raw(key, &encoded).await
    }

    async fn list_records<T: DeserializeOwned>(&self, prefix: &[u8]) -> Result<Vec<T>, StoreError> {
        self.list_raw(prefix)
            .await?
            .iter()
            .map(|raw| serde_json::from_slice(raw).map_err(StoreError::corrupt))
            .collect()
    }
}

/// Smallest key strictly greater than every key starting with `prefix`
fn prefix_upper_bound(prefix: &[u8]) -> Vec<u8> {
    let mut upper = prefix.to_vec();
    while let Some(last) = upper.last_mut() {
        if *last < u8::MAX {
            *last += 1;
            return upper;
        }
        upper.pop();
    }

    // All bytes were 0xff; the range is unbounded above
    vec![u8::MAX; prefix.len() + 1]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_key_layout() {
        assert_eq!(keys::pixel(0), [b'p', 0, 0]);
        assert_eq!(keys::pixel(1), [b'p', 1, 0]);
        assert_eq!(keys::pixel(0x1234), [b'p', 0x34, 0x12]);
    }

    #[test]
    fn entity_key_layout() {
        assert_eq!(
            keys::entity(keys::ANIMATION_PREFIX, "abc"),
            b"animation-abc".to_vec()
        );
    }

    #[test]
    fn prefix_bounds() {
        assert_eq!(prefix_upper_bound(b"preset-"), b"preset.".to_vec());
        assert_eq!(prefix_upper_bound(&[0x01, 0xff]), vec![0x02]);
    }

    #[tokio::test]
    async fn raw_round_trip() {
        let store = Store::open_in_memory(4).await.unwrap();

        assert_eq!(store.get_raw(b"missing").await.unwrap(), None);

        store.put_raw(b"key", b"value").await.unwrap();
        assert_eq!(store.get_raw(b"key").await.unwrap(), Some(b"value".to_vec()));

        store.put_raw(b"key", b"other").await.unwrap();
        assert_eq!(store.get_raw(b"key").await.unwrap(), Some(b"other".to_vec()));

        store.delete_raw(b"key").await.unwrap();
        assert_eq!(store.get_raw(b"key").await.unwrap(), None);
    }

    #[tokio::test]
    async fn prefix_listing_is_ordered_and_scoped() {
        let store = Store::open_in_memory(4).await.unwrap();

        store.put_raw(b"preset-b", b"2").await.unwrap();
        store.put_raw(b"preset-a", b"1").await.unwrap();
        store.put_raw(b"preset.", b"x").await.unwrap();
        store.put_raw(b"schedule-a", b"y").await.unwrap();

        let values = store.list_raw(keys::PRESET_PREFIX).await.unwrap();
        assert_eq!(values, vec![b"1".to_vec(), b"2".to_vec()]);
    }
}
