//! LMDB-backed durable store.
//!
//! Uses the heed crate (Rust bindings for LMDB). Entries survive process
//! restarts; the LMDB map size doubles as the store quota, so a full map is
//! reported as [`StoreError::QuotaExceeded`].
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. The backend uses:
//! - Read transactions for `get` and `stats`
//! - Write transactions for `set` and `remove`
//! - Hit/miss counters behind a lock shared by all contexts

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use heed::types::Str;
use heed::{Database, Env, EnvOpenOptions};
use revalidate_core::StoreError;

use crate::subscription::{ChangeFeed, StoreSubscription};
use crate::traits::{ContextId, KeyValueStore, StoreChange, StoreStats};

/// Error type for opening an LMDB store.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbStoreError> for StoreError {
    fn from(e: LmdbStoreError) -> Self {
        StoreError::Backend {
            reason: e.to_string(),
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: u64,
    misses: u64,
    quota_rejections: u64,
}

/// LMDB-backed [`KeyValueStore`].
///
/// # Example
///
/// ```ignore
/// let store = LmdbStore::open("/var/cache/app", 64)?;
/// store.set("users:1f2e", r#"{"data":[],"timestamp":0}"#).await?;
/// let other_tab = store.context();
/// ```
#[derive(Clone)]
pub struct LmdbStore {
    env: Env,
    path: PathBuf,
    db: Database<Str, Str>,
    map_size: u64,
    counters: Arc<RwLock<Counters>>,
    feed: ChangeFeed,
    context: ContextId,
}

impl std::fmt::Debug for LmdbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbStore")
            .field("path", &self.path)
            .field("map_size", &self.map_size)
            .field("context", &self.context)
            .finish()
    }
}

impl LmdbStore {
    /// Open (or create) a store under `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbStoreError> {
        std::fs::create_dir_all(&path)?;

        let map_size = max_size_mb
            .checked_mul(1024 * 1024)
            .ok_or_else(|| {
                LmdbStoreError::EnvOpen(format!("map size of {max_size_mb} MB overflows"))
            })?;
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let db: Database<Str, Str> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        Ok(Self {
            env,
            path: path.as_ref().to_path_buf(),
            db,
            map_size: map_size as u64,
            counters: Arc::new(RwLock::new(Counters::default())),
            feed: ChangeFeed::default(),
            context: ContextId::new(),
        })
    }

    /// A new handle on the same environment, writing as a different context.
    pub fn context(&self) -> Self {
        Self {
            context: ContextId::new(),
            ..self.clone()
        }
    }

    fn quota_or_backend(&self, key: &str, needed: usize, e: heed::Error) -> StoreError {
        match e {
            heed::Error::Mdb(heed::MdbError::MapFull) => {
                if let Ok(mut counters) = self.counters.write() {
                    counters.quota_rejections += 1;
                }
                StoreError::QuotaExceeded {
                    key: key.to_string(),
                    needed: needed as u64,
                    limit: self.map_size,
                }
            }
            other => StoreError::Backend {
                reason: other.to_string(),
            },
        }
    }

    fn record_read(&self, hit: bool) {
        if let Ok(mut counters) = self.counters.write() {
            if hit {
                counters.hits += 1;
            } else {
                counters.misses += 1;
            }
        }
    }
}

fn backend(e: heed::Error) -> StoreError {
    StoreError::Backend {
        reason: e.to_string(),
    }
}

#[async_trait]
impl KeyValueStore for LmdbStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let rtxn = self.env.read_txn().map_err(backend)?;
        let value = self.db.get(&rtxn, key).map_err(backend)?.map(str::to_string);
        self.record_read(value.is_some());
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let needed = key.len() + value.len();
        let mut wtxn = self.env.write_txn().map_err(backend)?;

        self.db
            .put(&mut wtxn, key, value)
            .map_err(|e| self.quota_or_backend(key, needed, e))?;

        wtxn.commit()
            .map_err(|e| self.quota_or_backend(key, needed, e))?;

        self.feed.publish(StoreChange {
            key: key.to_string(),
            value: Some(value.to_string()),
            origin: self.context,
        });
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut wtxn = self.env.write_txn().map_err(backend)?;
        let deleted = self.db.delete(&mut wtxn, key).map_err(backend)?;
        wtxn.commit().map_err(backend)?;

        if deleted {
            self.feed.publish(StoreChange {
                key: key.to_string(),
                value: None,
                origin: self.context,
            });
        }
        Ok(())
    }

    fn subscribe(&self, key: &str) -> StoreSubscription {
        self.feed.subscribe(key, self.context)
    }

    fn context_id(&self) -> ContextId {
        self.context
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let rtxn = self.env.read_txn().map_err(backend)?;
        let mut entry_count = 0u64;
        let mut bytes = 0u64;
        for result in self.db.iter(&rtxn).map_err(backend)? {
            let (key, value) = result.map_err(backend)?;
            entry_count += 1;
            bytes += (key.len() + value.len()) as u64;
        }

        let counters = self.counters.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(StoreStats {
            hits: counters.hits,
            misses: counters.misses,
            entry_count,
            bytes,
            quota_rejections: counters.quota_rejections,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription::StoreEvent;
    use tempfile::TempDir;

    fn create_test_store() -> (LmdbStore, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let store = LmdbStore::open(temp_dir.path(), 10).expect("store open should succeed");
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let (store, _temp_dir) = create_test_store();

        store.set("k", "v").await.expect("set should succeed");
        let value = store.get("k").await.expect("get should succeed");
        assert_eq!(value.as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_get_nonexistent() {
        let (store, _temp_dir) = create_test_store();
        assert_eq!(store.get("nope").await.expect("get should succeed"), None);
    }

    #[tokio::test]
    async fn test_remove() {
        let (store, _temp_dir) = create_test_store();
        store.set("k", "v").await.expect("set should succeed");
        store.remove("k").await.expect("remove should succeed");
        assert_eq!(store.get("k").await.expect("get should succeed"), None);
        store.remove("k").await.expect("second remove should succeed");
    }

    #[test]
    fn test_oversized_map_is_rejected() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let result = LmdbStore::open(temp_dir.path(), usize::MAX);
        assert!(matches!(result, Err(LmdbStoreError::EnvOpen(_))));
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        {
            let store = LmdbStore::open(temp_dir.path(), 10).expect("open should succeed");
            store.set("k", "durable").await.expect("set should succeed");
        }
        let store = LmdbStore::open(temp_dir.path(), 10).expect("reopen should succeed");
        assert_eq!(
            store.get("k").await.expect("get should succeed").as_deref(),
            Some("durable")
        );
    }

    #[tokio::test]
    async fn test_map_full_is_quota_exceeded() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let store = LmdbStore::open(temp_dir.path(), 1).expect("open should succeed");

        let huge = "x".repeat(4 * 1024 * 1024);
        let err = store.set("big", &huge).await.expect_err("set should fail");
        assert!(err.is_quota_exceeded(), "unexpected error: {err:?}");

        let stats = store.stats().await.expect("stats should succeed");
        assert_eq!(stats.quota_rejections, 1);
        assert_eq!(stats.entry_count, 0);
    }

    #[tokio::test]
    async fn test_context_notifications() {
        let (tab_a, _temp_dir) = create_test_store();
        let tab_b = tab_a.context();
        let mut sub_b = tab_b.subscribe("k");

        tab_a.set("k", "v").await.expect("set should succeed");

        match sub_b.recv().await {
            Some(StoreEvent::Changed(change)) => {
                assert_eq!(change.origin, tab_a.context_id());
                assert_eq!(change.value.as_deref(), Some("v"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(
            tab_b.get("k").await.expect("get should succeed").as_deref(),
            Some("v")
        );
    }

    #[tokio::test]
    async fn test_stats() {
        let (store, _temp_dir) = create_test_store();

        let _ = store.get("k").await;
        store.set("k", "v").await.expect("set should succeed");
        let _ = store.get("k").await;
        let _ = store.get("k").await;

        let stats = store.stats().await.expect("stats should succeed");
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.entry_count, 1);
        assert_eq!(stats.bytes, 2);
    }
}
