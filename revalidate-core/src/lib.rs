//! revalidate Core - Data Types
//!
//! Pure data structures and policies shared by the store and fetch crates:
//! persisted cache entries, the observable per-instance cache state, the
//! fetch error taxonomy, physical key derivation and the freshness policy.

pub mod clock;
pub mod config;
pub mod error;
pub mod freshness;
pub mod key;

pub use clock::{Clock, SystemClock};
pub use config::CachedFetchConfig;
pub use error::{
    ConfigError, FetchError, FetchErrorKind, RevalidateError, RevalidateResult, StoreError,
};
pub use freshness::{FreshnessPolicy, Verdict};
pub use key::CacheKey;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;

/// Milliseconds since the Unix epoch.
pub type EpochMillis = i64;

/// Marker trait for values that can be cached.
///
/// Values are persisted as JSON and shared with background tasks, so they
/// must be serializable, cloneable and thread-safe.
pub trait Cacheable: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Cacheable for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

fn duration_ms(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

// ============================================================================
// PERSISTED ENTRY
// ============================================================================

/// A durable cache entry as written to the persistent store.
///
/// `timestamp` is always the write instant, and `expires` (when present) is
/// never earlier than `timestamp`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    data: T,
    timestamp: EpochMillis,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires: Option<EpochMillis>,
}

impl<T> CacheEntry<T> {
    /// Build an entry written at `now`, optionally expiring `ttl` later.
    pub fn written_at(data: T, now: EpochMillis, ttl: Option<Duration>) -> Self {
        Self {
            data,
            timestamp: now,
            expires: ttl.map(|ttl| now.saturating_add(duration_ms(ttl))),
        }
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    pub fn into_data(self) -> T {
        self.data
    }

    pub fn timestamp(&self) -> EpochMillis {
        self.timestamp
    }

    pub fn expires(&self) -> Option<EpochMillis> {
        self.expires
    }

    /// Age of the entry at `now`, clamped to zero for clock skew.
    pub fn age_ms(&self, now: EpochMillis) -> i64 {
        now.saturating_sub(self.timestamp).max(0)
    }

    /// True when `now` is strictly past the hard expiry.
    pub fn is_past_expiry(&self, now: EpochMillis) -> bool {
        self.expires.is_some_and(|expires| now > expires)
    }
}

impl<T: Serialize> CacheEntry<T> {
    /// Encode for the persistent store.
    pub fn encode(&self) -> Result<String, FetchError> {
        Ok(serde_json::to_string(self)?)
    }
}

impl<T: DeserializeOwned> CacheEntry<T> {
    /// Decode a stored value. Corruption surfaces as `parse_error`.
    pub fn decode(raw: &str) -> Result<Self, FetchError> {
        let entry: Self = serde_json::from_str(raw)?;
        if entry.expires.is_some_and(|expires| expires < entry.timestamp) {
            return Err(FetchError::parse("entry expires before it was written"));
        }
        Ok(entry)
    }
}

// ============================================================================
// IN-MEMORY STATE
// ============================================================================

/// Provenance of the data currently held by a cache instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Cache,
    Network,
}

/// Observable state of one cache instance.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheState<T> {
    pub data: Option<T>,
    /// First fetch in progress with nothing to show yet.
    pub is_loading: bool,
    /// Any fetch in flight, foreground or background.
    pub is_validating: bool,
    /// Invalidated and waiting for the replacement fetch.
    pub is_stale: bool,
    pub error: Option<FetchError>,
    pub last_fetch_at: Option<EpochMillis>,
    pub source: Option<DataSource>,
}

impl<T> Default for CacheState<T> {
    fn default() -> Self {
        Self {
            data: None,
            is_loading: false,
            is_validating: false,
            is_stale: false,
            error: None,
            last_fetch_at: None,
            source: None,
        }
    }
}

impl<T> CacheState<T> {
    /// Fresh state with every field empty.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }

    /// True if nothing is held and nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.data.is_none()
            && !self.is_loading
            && !self.is_validating
            && !self.is_stale
            && self.error.is_none()
            && self.last_fetch_at.is_none()
            && self.source.is_none()
    }
}

/// Introspection snapshot of the persisted entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheInfo {
    /// Size of the stored entry in bytes.
    pub size: usize,
    pub age_ms: i64,
    pub is_expired: bool,
}

impl CacheInfo {
    /// Info reported when nothing is stored.
    pub fn empty() -> Self {
        Self {
            size: 0,
            age_ms: 0,
            is_expired: true,
        }
    }
}
