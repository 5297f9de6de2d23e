//! revalidate Test Utilities
//!
//! Shared test infrastructure for the revalidate workspace:
//! - Test doubles: a manual clock, a scripted fetcher, a failing store
//! - Proptest generators for entries, errors and keys
//! - Fixtures for seeding stores
//! - Assertions on cache state

pub use revalidate_core::{
    CacheEntry, CacheKey, CacheState, Clock, DataSource, EpochMillis, FetchError, FetchErrorKind,
    StoreError,
};
pub use revalidate_storage::{KeyValueStore, MemoryStore};

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use revalidate_fetch::{FetchRequest, Fetcher};
use revalidate_storage::{ContextId, StoreStats, StoreSubscription};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Notify;

// ============================================================================
// TEST DOUBLES
// ============================================================================

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start: EpochMillis) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    pub fn set(&self, now: EpochMillis) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.now
            .fetch_add(i64::try_from(by.as_millis()).unwrap_or(i64::MAX), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> EpochMillis {
        self.now.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
struct Step {
    delay: Duration,
    outcome: Result<Value, FetchError>,
}

/// Fetcher that replays queued responses in order.
///
/// Each response waits its delay on the tokio clock before resolving, so
/// paused-time tests control exactly when fetches settle. Once the queue is
/// empty every call fails with `network_error`.
#[derive(Debug)]
pub struct ScriptedFetcher {
    identity: String,
    script: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
    requests: Mutex<Vec<FetchRequest>>,
}

impl ScriptedFetcher {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            script: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a successful response.
    pub fn respond<V: Serialize>(&self, delay: Duration, value: V) -> &Self {
        let outcome = serde_json::to_value(value).map_err(FetchError::from);
        self.push(Step { delay, outcome })
    }

    /// Queue a failure.
    pub fn fail(&self, delay: Duration, error: FetchError) -> &Self {
        self.push(Step {
            delay,
            outcome: Err(error),
        })
    }

    fn push(&self, step: Step) -> &Self {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(step);
        self
    }

    /// Number of fetches started so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every request received, oldest first.
    pub fn requests(&self) -> Vec<FetchRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Physical key a cache named `logical_name` will use with this fetcher.
    pub fn key_for(&self, logical_name: &str) -> CacheKey {
        CacheKey::derive(logical_name, &self.identity)
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<Value, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        let step = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();

        match step {
            Some(step) => {
                tokio::time::sleep(step.delay).await;
                step.outcome
            }
            None => Err(FetchError::network("no scripted response")),
        }
    }

    fn identity(&self) -> String {
        self.identity.clone()
    }
}

/// Store wrapper whose reads and writes can be switched to fail, and whose
/// writes can be made to stall the calling thread.
#[derive(Debug, Default)]
pub struct FailingStore {
    inner: MemoryStore,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    stall_ms: AtomicU64,
    write_started: Notify,
}

impl FailingStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Block the writing thread for `stall` before each `set` lands, like a
    /// synchronous disk write.
    pub fn stall_writes(&self, stall: Duration) {
        let ms = u64::try_from(stall.as_millis()).unwrap_or(u64::MAX);
        self.stall_ms.store(ms, Ordering::SeqCst);
    }

    /// Resolves once a `set` has begun.
    pub async fn write_started(&self) {
        self.write_started.notified().await;
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    fn backend_error(op: &str) -> StoreError {
        StoreError::Backend {
            reason: format!("injected {op} failure"),
        }
    }
}

#[async_trait]
impl KeyValueStore for FailingStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Self::backend_error("read"));
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Self::backend_error("write"));
        }
        self.write_started.notify_one();
        let stall = self.stall_ms.load(Ordering::SeqCst);
        if stall > 0 {
            std::thread::sleep(Duration::from_millis(stall));
        }
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Self::backend_error("remove"));
        }
        self.inner.remove(key).await
    }

    fn subscribe(&self, key: &str) -> StoreSubscription {
        self.inner.subscribe(key)
    }

    fn context_id(&self) -> ContextId {
        self.inner.context_id()
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        self.inner.stats().await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for revalidate types.

    use super::*;
    use proptest::prelude::*;

    /// Generate any error kind.
    pub fn arb_fetch_error_kind() -> impl Strategy<Value = FetchErrorKind> {
        prop_oneof![
            Just(FetchErrorKind::Network),
            Just(FetchErrorKind::Timeout),
            Just(FetchErrorKind::Parse),
            Just(FetchErrorKind::Validation),
            Just(FetchErrorKind::Transform),
            Just(FetchErrorKind::Unknown),
        ]
    }

    /// Generate a structured fetch error.
    pub fn arb_fetch_error() -> impl Strategy<Value = FetchError> {
        (arb_fetch_error_kind(), "[a-zA-Z ]{0,40}")
            .prop_map(|(kind, message)| FetchError::new(kind, message))
    }

    /// Generate a write instant within a plausible range.
    pub fn arb_timestamp() -> impl Strategy<Value = EpochMillis> {
        0i64..4_102_444_800_000
    }

    /// Generate an entry with an optional TTL of up to one day.
    pub fn arb_cache_entry() -> impl Strategy<Value = CacheEntry<String>> {
        (
            "[a-z0-9]{0,32}",
            arb_timestamp(),
            prop::option::of(0u64..86_400_000),
        )
            .prop_map(|(data, timestamp, ttl_ms)| {
                CacheEntry::written_at(data, timestamp, ttl_ms.map(Duration::from_millis))
            })
    }

    /// Generate a logical cache name.
    pub fn arb_logical_name() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_-]{0,23}"
    }

    /// Generate stored text that is not a valid entry.
    pub fn arb_corrupt_entry() -> impl Strategy<Value = String> {
        prop_oneof![
            Just(String::new()),
            Just("{".to_string()),
            Just("null".to_string()),
            Just(r#"{"timestamp":1}"#.to_string()),
            Just(r#"{"data":"A","timestamp":10,"expires":5}"#.to_string()),
            "[^{}]{1,40}",
        ]
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Helpers for seeding stores.

    use super::*;

    /// Write `data` under `key` as if it had been fetched at `written_at`.
    pub async fn seed_entry<S, T>(
        store: &S,
        key: &CacheKey,
        data: T,
        written_at: EpochMillis,
        ttl: Option<Duration>,
    ) where
        S: KeyValueStore + ?Sized,
        T: Serialize,
    {
        let raw = CacheEntry::written_at(data, written_at, ttl)
            .encode()
            .expect("entry should encode");
        store
            .set(key.as_str(), &raw)
            .await
            .expect("seeding the store should succeed");
    }

    /// Decode whatever is stored under `key`.
    pub async fn stored_entry<S>(store: &S, key: &CacheKey) -> Option<CacheEntry<Value>>
    where
        S: KeyValueStore + ?Sized,
    {
        let raw = store
            .get(key.as_str())
            .await
            .expect("store read should succeed")?;
        Some(CacheEntry::decode(&raw).expect("stored entry should decode"))
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions on cache state.

    use super::*;

    /// Assert the state holds `expected` from `source`.
    pub fn assert_data<T>(state: &CacheState<T>, expected: &T, source: DataSource)
    where
        T: PartialEq + std::fmt::Debug,
    {
        assert_eq!(state.data.as_ref(), Some(expected), "unexpected data in {state:?}");
        assert_eq!(state.source, Some(source), "unexpected source in {state:?}");
    }

    /// Assert the state carries an error of `kind`.
    pub fn assert_error_kind<T: std::fmt::Debug>(state: &CacheState<T>, kind: FetchErrorKind) {
        match &state.error {
            Some(error) => assert_eq!(error.kind, kind, "wrong error kind in {state:?}"),
            None => panic!("expected {kind} error, state was {state:?}"),
        }
    }

    /// Assert no fetch is in flight.
    pub fn assert_idle<T: std::fmt::Debug>(state: &CacheState<T>) {
        assert!(!state.is_loading, "still loading: {state:?}");
        assert!(!state.is_validating, "still validating: {state:?}");
    }
}
