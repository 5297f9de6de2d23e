//! Persistent key-value store trait and change notifications.
//!
//! The store is the only channel between cache instances: entries are
//! written and read as strings, and a mutation made through one context is
//! announced to every other context sharing the same data.

use async_trait::async_trait;
use revalidate_core::StoreError;
use std::fmt;
use uuid::Uuid;

use crate::subscription::StoreSubscription;

/// Identifies one execution context (a "tab") attached to a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(Uuid);

impl ContextId {
    /// Allocate a new, time-ordered context id.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A mutation announced on the change feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChange {
    pub key: String,
    /// New value, or `None` when the key was removed.
    pub value: Option<String>,
    /// Context that performed the write.
    pub origin: ContextId,
}

/// Durable key-value store shared by cache instances.
///
/// Single-key operations are atomic. Implementations must publish a
/// [`StoreChange`] for every successful `set` and `remove`.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the raw value stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write `value` under `key`.
    ///
    /// Fails with [`StoreError::QuotaExceeded`] when the store is full.
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Remove `key`. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Watch `key` for writes made by other contexts.
    ///
    /// Dropping the returned handle ends the subscription.
    fn subscribe(&self, key: &str) -> StoreSubscription;

    /// The context this handle writes as.
    fn context_id(&self) -> ContextId;

    /// Usage statistics.
    async fn stats(&self) -> Result<StoreStats, StoreError>;
}

/// Statistics about store usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Reads that found a value.
    pub hits: u64,
    /// Reads that found nothing.
    pub misses: u64,
    /// Number of keys currently stored.
    pub entry_count: u64,
    /// Approximate bytes used by keys and values.
    pub bytes: u64,
    /// Writes rejected for lack of space.
    pub quota_rejections: u64,
}

impl StoreStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_stats_hit_rate() {
        let stats = StoreStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);

        let empty_stats = StoreStats::default();
        assert!((empty_stats.hit_rate() - 0.0).abs() < 0.001);
    }

    #[test]
    fn test_context_ids_are_distinct() {
        let a = ContextId::new();
        let b = ContextId::new();
        assert_ne!(a, b);
        assert_eq!(a.to_string(), a.as_uuid().to_string());
    }
}
