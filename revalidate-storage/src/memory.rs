//! In-memory store with per-context handles and an optional byte quota.
//!
//! Behaves like browser local storage: every context created with
//! [`MemoryStore::context`] sees the same data and is notified of writes
//! made by the others.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use revalidate_core::StoreError;

use crate::subscription::{ChangeFeed, StoreSubscription};
use crate::traits::{ContextId, KeyValueStore, StoreChange, StoreStats};

#[derive(Debug, Default)]
struct Shared {
    entries: RwLock<HashMap<String, String>>,
    stats: RwLock<StoreStats>,
    quota_bytes: Option<u64>,
    feed: ChangeFeed,
}

/// In-memory [`KeyValueStore`].
///
/// Cloning keeps the same context; use [`MemoryStore::context`] for a
/// sibling that acts as a separate writer.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
    context: ContextId,
}

fn entry_bytes(key: &str, value: &str) -> u64 {
    (key.len() + value.len()) as u64
}

impl MemoryStore {
    /// Create an unbounded store.
    pub fn new() -> Self {
        Self::from_shared(Shared::default())
    }

    /// Create a store that rejects writes once keys plus values exceed
    /// `quota_bytes`.
    pub fn with_quota(quota_bytes: u64) -> Self {
        Self::from_shared(Shared {
            quota_bytes: Some(quota_bytes),
            ..Shared::default()
        })
    }

    fn from_shared(shared: Shared) -> Self {
        Self {
            shared: Arc::new(shared),
            context: ContextId::new(),
        }
    }

    /// A new handle on the same data, writing as a different context.
    pub fn context(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            context: ContextId::new(),
        }
    }

    /// Overwrite a key without quota checks or notifications.
    ///
    /// Useful for seeding corrupted or hand-written entries.
    pub fn insert_raw(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.shared
            .entries
            .write()
            .map_err(|_| StoreError::LockPoisoned)?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.shared.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn record_read(&self, hit: bool) {
        if let Ok(mut stats) = self.shared.stats.write() {
            if hit {
                stats.hits += 1;
            } else {
                stats.misses += 1;
            }
        }
    }

    fn record_quota_rejection(&self) {
        if let Ok(mut stats) = self.shared.stats.write() {
            stats.quota_rejections += 1;
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value = self
            .shared
            .entries
            .read()
            .map_err(|_| StoreError::LockPoisoned)?
            .get(key)
            .cloned();
        self.record_read(value.is_some());
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        {
            let mut entries = self
                .shared
                .entries
                .write()
                .map_err(|_| StoreError::LockPoisoned)?;

            if let Some(limit) = self.shared.quota_bytes {
                let used: u64 = entries
                    .iter()
                    .filter(|(k, _)| k.as_str() != key)
                    .map(|(k, v)| entry_bytes(k, v))
                    .sum();
                let needed = entry_bytes(key, value);
                if used + needed > limit {
                    drop(entries);
                    self.record_quota_rejection();
                    return Err(StoreError::QuotaExceeded {
                        key: key.to_string(),
                        needed,
                        limit,
                    });
                }
            }

            entries.insert(key.to_string(), value.to_string());
        }

        self.shared.feed.publish(StoreChange {
            key: key.to_string(),
            value: Some(value.to_string()),
            origin: self.context,
        });
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let removed = self
            .shared
            .entries
            .write()
            .map_err(|_| StoreError::LockPoisoned)?
            .remove(key)
            .is_some();

        if removed {
            self.shared.feed.publish(StoreChange {
                key: key.to_string(),
                value: None,
                origin: self.context,
            });
        }
        Ok(())
    }

    fn subscribe(&self, key: &str) -> StoreSubscription {
        self.shared.feed.subscribe(key, self.context)
    }

    fn context_id(&self) -> ContextId {
        self.context
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let entries = self
            .shared
            .entries
            .read()
            .map_err(|_| StoreError::LockPoisoned)?;
        let mut stats = self
            .shared
            .stats
            .read()
            .map_err(|_| StoreError::LockPoisoned)?
            .clone();
        stats.entry_count = entries.len() as u64;
        stats.bytes = entries.iter().map(|(k, v)| entry_bytes(k, v)).sum();
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription::StoreEvent;
    use std::time::Duration;

    #[tokio::test]
    async fn test_set_get_remove() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);

        store.set("k", "v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        store.remove("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
        // Removing again is fine
        store.remove("k").await.unwrap();
    }

    #[tokio::test]
    async fn test_contexts_share_data() {
        let tab_a = MemoryStore::new();
        let tab_b = tab_a.context();
        assert_ne!(tab_a.context_id(), tab_b.context_id());

        tab_a.set("k", "from-a").await.unwrap();
        assert_eq!(tab_b.get("k").await.unwrap().as_deref(), Some("from-a"));
    }

    #[tokio::test]
    async fn test_notifications_reach_other_contexts_only() {
        let tab_a = MemoryStore::new();
        let tab_b = tab_a.context();
        let mut sub_a = tab_a.subscribe("k");
        let mut sub_b = tab_b.subscribe("k");

        tab_a.set("k", "v1").await.unwrap();

        match sub_b.recv().await {
            Some(StoreEvent::Changed(change)) => {
                assert_eq!(change.value.as_deref(), Some("v1"));
                assert_eq!(change.origin, tab_a.context_id());
            }
            other => panic!("unexpected event: {other:?}"),
        }

        // tab_a never hears about its own write
        let own = tokio::time::timeout(Duration::from_millis(20), sub_a.recv()).await;
        assert!(own.is_err());
    }

    #[tokio::test]
    async fn test_remove_notifies_with_none() {
        let tab_a = MemoryStore::new();
        let tab_b = tab_a.context();
        tab_a.set("k", "v").await.unwrap();

        let mut sub_b = tab_b.subscribe("k");
        tab_a.remove("k").await.unwrap();

        match sub_b.recv().await {
            Some(StoreEvent::Changed(change)) => assert_eq!(change.value, None),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_quota_rejects_and_counts() {
        let store = MemoryStore::with_quota(10);
        store.set("a", "1234").await.unwrap(); // 5 bytes

        let err = store.set("b", "123456789").await.unwrap_err();
        assert!(err.is_quota_exceeded());
        assert_eq!(store.get("b").await.unwrap(), None);

        // Overwriting an existing key only counts the replacement
        store.set("a", "123456789").await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.quota_rejections, 1);
        assert_eq!(stats.entry_count, 1);
        assert_eq!(stats.bytes, 10);
    }

    #[tokio::test]
    async fn test_stats_track_hits_and_misses() {
        let store = MemoryStore::new();
        let _ = store.get("missing").await;
        store.set("k", "v").await.unwrap();
        let _ = store.get("k").await;
        let _ = store.get("k").await;

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 2);
    }

    #[tokio::test]
    async fn test_insert_raw_is_silent() {
        let tab_a = MemoryStore::new();
        let tab_b = tab_a.context();
        let mut sub_b = tab_b.subscribe("k");

        tab_a.insert_raw("k", "{corrupt").unwrap();
        assert_eq!(tab_b.get("k").await.unwrap().as_deref(), Some("{corrupt"));

        let heard = tokio::time::timeout(Duration::from_millis(20), sub_b.recv()).await;
        assert!(heard.is_err());
    }
}
