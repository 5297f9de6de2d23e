//! revalidate Fetch - Stale-While-Revalidate Cached Fetch
//!
//! Serves data from a persistent [`KeyValueStore`] while it is fresh,
//! refreshes it in the background, and keeps every instance sharing a key
//! in step through store change notifications.
//!
//! # Architecture
//!
//! ```text
//! CachedFetch ──► Fetcher (network)
//!      │
//!      ├──► KeyValueStore (durable CacheEntry, change feed)
//!      └──► watch channel (observable CacheState)
//! ```
//!
//! Each fetch runs on its own task. Starting a fetch aborts the previous
//! one, and a per-instance generation number guarantees that only the most
//! recently started fetch can commit.

pub mod cached_fetch;
pub mod fetcher;
#[cfg(feature = "http")]
pub mod http;
pub mod options;
mod tasks;
pub mod telemetry;

pub use cached_fetch::{CachedFetch, CachedFetchBuilder};
pub use fetcher::{fetcher_fn, FetchRequest, Fetcher, FnFetcher};
#[cfg(feature = "http")]
pub use http::HttpFetcher;
pub use options::FetchOptions;
pub use telemetry::{init_tracing, TelemetryConfig, TelemetryError};

pub use revalidate_core::{
    CacheEntry, CacheInfo, CacheKey, CacheState, Cacheable, CachedFetchConfig, Clock, DataSource,
    FetchError, FetchErrorKind, RevalidateError, RevalidateResult, SystemClock,
};
pub use revalidate_storage::{KeyValueStore, LmdbStore, MemoryStore, StoreError};
