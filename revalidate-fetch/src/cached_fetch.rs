//! Stale-while-revalidate orchestration for one logical cache key.
//!
//! A [`CachedFetch`] owns the in-memory [`CacheState`] of one instance and
//! shares the durable [`CacheEntry`] with every other instance through the
//! [`KeyValueStore`]. Fetches run on spawned tasks; starting a new fetch
//! aborts the previous one, and a generation number taken at start decides
//! whether a result may still be committed. Store mutations made by one
//! instance are serialized, so a result that loses the generation check can
//! never land in the store after a later clear or mutate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use revalidate_core::{
    CacheEntry, CacheInfo, CacheKey, CacheState, Cacheable, CachedFetchConfig, Clock, DataSource,
    EpochMillis, FetchError, FetchErrorKind, FreshnessPolicy, RevalidateResult, SystemClock,
    Verdict,
};
use revalidate_storage::KeyValueStore;
use serde::de::IgnoredAny;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::{AbortHandle, JoinHandle};

use crate::fetcher::{FetchRequest, Fetcher};
use crate::options::FetchOptions;
use crate::tasks;

fn lock<G>(mutex: &Mutex<G>) -> MutexGuard<'_, G> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// SHARED INSTANCE STATE
// ============================================================================

pub(crate) struct Inner<T, S> {
    pub(crate) key: CacheKey,
    store: Arc<S>,
    fetcher: Arc<dyn Fetcher>,
    config: CachedFetchConfig,
    options: FetchOptions<T>,
    policy: FreshnessPolicy,
    clock: Arc<dyn Clock>,
    state: watch::Sender<CacheState<T>>,
    generation: AtomicU64,
    in_flight: Mutex<Option<AbortHandle>>,
    /// Held across check-commit-persist and around clear/mutate writes.
    writes: AsyncMutex<()>,
}

impl<T, S> Inner<T, S> {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Abort the in-flight fetch and retire its generation.
    fn cancel_in_flight(&self) {
        let mut in_flight = lock(&self.in_flight);
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(handle) = in_flight.take() {
            handle.abort();
        }
    }
}

impl<T, S> Inner<T, S>
where
    T: Cacheable,
    S: KeyValueStore + 'static,
{
    pub(crate) fn snapshot(&self) -> CacheState<T> {
        self.state.borrow().clone()
    }

    /// True when the refresh timer should fire a background fetch.
    pub(crate) fn wants_refresh(&self) -> bool {
        let state = self.state.borrow();
        state.data.is_some() && !state.is_validating
    }

    /// Start a fetch on its own task, superseding any fetch in flight.
    pub(crate) fn start_fetch(self: &Arc<Self>, background: bool) -> JoinHandle<Option<T>> {
        let mut in_flight = lock(&self.in_flight);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(previous) = in_flight.take() {
            previous.abort();
            tracing::trace!(key = %self.key, generation, "Superseded in-flight fetch");
        }

        self.state.send_modify(|state| {
            state.is_validating = true;
            if !background && state.data.is_none() {
                state.is_loading = true;
            }
        });

        let inner = Arc::clone(self);
        let handle = tokio::spawn(async move { inner.run_fetch(generation, background).await });
        *in_flight = Some(handle.abort_handle());
        handle
    }

    async fn run_fetch(&self, generation: u64, background: bool) -> Option<T> {
        let request = FetchRequest {
            headers: self.config.headers.clone(),
            background,
            generation,
        };

        tracing::debug!(key = %self.key, generation, background, "Fetching");

        match self.fetch_once(&request).await {
            Ok(data) => self.commit_success(generation, data).await,
            Err(error) => {
                self.commit_failure(generation, error);
                None
            }
        }
    }

    async fn fetch_once(&self, request: &FetchRequest) -> Result<T, FetchError> {
        let call = self.fetcher.fetch(request);
        let outcome = match self.config.effective_timeout() {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| FetchError::timeout(limit))?,
            None => call.await,
        };

        let raw = outcome.map_err(|error| match error.kind {
            FetchErrorKind::Unknown => {
                FetchError::classify(error.message, self.options.has_transform())
            }
            _ => error,
        })?;

        let data = self.options.decode(raw)?;
        self.options.check(&data)?;
        Ok(data)
    }

    async fn commit_success(&self, generation: u64, data: T) -> Option<T> {
        let _writes = self.writes.lock().await;
        let now = self.clock.now_ms();

        let committed = self.state.send_if_modified(|state| {
            if !self.is_current(generation) {
                return false;
            }
            state.data = Some(data.clone());
            state.source = Some(DataSource::Network);
            state.is_stale = false;
            state.error = None;
            state.last_fetch_at = Some(now);
            state.is_loading = false;
            state.is_validating = false;
            true
        });

        if !committed {
            tracing::trace!(key = %self.key, generation, "Discarding superseded result");
            return None;
        }

        self.persist(&data, now).await;
        tracing::debug!(key = %self.key, generation, "Committed network result");
        self.options.notify_success(&data, false);
        Some(data)
    }

    fn commit_failure(&self, generation: u64, error: FetchError) {
        let committed = self.state.send_if_modified(|state| {
            if !self.is_current(generation) {
                return false;
            }
            state.error = Some(error.clone());
            state.is_loading = false;
            state.is_validating = false;
            true
        });

        if committed {
            tracing::warn!(
                key = %self.key,
                generation,
                kind = error.kind.as_str(),
                error = %error.message,
                "Fetch failed"
            );
            self.options.notify_error(&error);
        }
    }

    /// Write `data` as a fresh entry. Store failures only affect durability.
    async fn persist(&self, data: &T, now: EpochMillis) {
        let raw = match CacheEntry::written_at(data, now, Some(self.config.cache_time)).encode() {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "Failed to encode cache entry");
                return;
            }
        };

        match self.store.set(self.key.as_str(), &raw).await {
            Ok(()) => tracing::trace!(key = %self.key, bytes = raw.len(), "Persisted cache entry"),
            Err(e) if e.is_quota_exceeded() => {
                tracing::warn!(key = %self.key, error = %e, "Store quota exceeded, entry not persisted");
            }
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "Failed to persist cache entry");
            }
        }
    }

    /// Read and decode the stored entry. Corruption and read failures are
    /// reported as a miss.
    async fn read_entry(&self) -> Option<CacheEntry<T>> {
        let raw = match self.store.get(self.key.as_str()).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "Failed to read cache entry");
                return None;
            }
        };

        match CacheEntry::decode(&raw) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(
                    key = %self.key,
                    kind = e.kind.as_str(),
                    error = %e.message,
                    "Ignoring corrupted cache entry"
                );
                None
            }
        }
    }

    async fn remove_entry(&self) {
        if let Err(e) = self.store.remove(self.key.as_str()).await {
            tracing::warn!(key = %self.key, error = %e, "Failed to remove cache entry");
        }
    }

    /// The stored entry if it may be served at `now`, otherwise the reason
    /// it may not.
    async fn read_valid_entry(&self, now: EpochMillis) -> Result<CacheEntry<T>, Verdict> {
        let entry = self.read_entry().await;
        let verdict = self
            .policy
            .evaluate(entry.as_ref(), now, self.options.validator());
        match verdict {
            Verdict::Fresh => entry.ok_or(Verdict::Missing),
            verdict => Err(verdict),
        }
    }

    async fn initialize(self: &Arc<Self>) {
        let now = self.clock.now_ms();

        let entry = match self.read_valid_entry(now).await {
            Ok(entry) => entry,
            Err(verdict) => {
                tracing::debug!(key = %self.key, verdict = verdict.as_str(), "Cache miss");
                drop(self.start_fetch(false));
                return;
            }
        };

        let age_ms = entry.age_ms(now);
        let data = entry.into_data();
        self.state.send_modify(|state| {
            state.data = Some(data.clone());
            state.source = Some(DataSource::Cache);
            state.is_stale = false;
        });

        tracing::debug!(key = %self.key, age_ms, "Cache hit");
        self.options.notify_success(&data, true);

        if self.config.stale_while_revalidate {
            drop(self.start_fetch(true));
        }
    }

    /// Re-read the store after another context changed our key.
    pub(crate) async fn adopt_external_change(&self) {
        let now = self.clock.now_ms();
        match self.read_valid_entry(now).await {
            Ok(entry) => {
                let data = entry.into_data();
                self.state.send_modify(|state| {
                    state.data = Some(data);
                    state.source = Some(DataSource::Cache);
                    state.is_stale = false;
                    state.error = None;
                });
                tracing::debug!(key = %self.key, "Adopted entry written by another context");
            }
            Err(verdict) => {
                self.state.send_if_modified(|state| {
                    let was_stale = state.is_stale;
                    state.is_stale = true;
                    !was_stale
                });
                tracing::debug!(
                    key = %self.key,
                    verdict = verdict.as_str(),
                    "Entry removed or invalidated by another context"
                );
            }
        }
    }
}

// ============================================================================
// PUBLIC HANDLE
// ============================================================================

/// A cached fetch for one logical key.
///
/// Created with [`CachedFetch::builder`]. Dropping the handle (or calling
/// [`CachedFetch::dispose`]) aborts the in-flight fetch and stops the
/// refresh timer and the sync listener.
///
/// # Example
///
/// ```ignore
/// let store = Arc::new(MemoryStore::new());
/// let users = CachedFetch::<Vec<User>, _>::builder("users", store, Arc::new(fetcher))
///     .config(CachedFetchConfig::default().with_timeout(Duration::from_secs(5)))
///     .mount()
///     .await?;
///
/// let state = users.wait_until_idle().await;
/// ```
pub struct CachedFetch<T, S> {
    inner: Arc<Inner<T, S>>,
    shutdown: watch::Sender<bool>,
}

impl<T, S> std::fmt::Debug for CachedFetch<T, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedFetch")
            .field("key", &self.inner.key)
            .field("generation", &self.inner.generation.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl<T, S> CachedFetch<T, S>
where
    T: Cacheable,
    S: KeyValueStore + 'static,
{
    /// Start building an instance for `logical_name`.
    pub fn builder(
        logical_name: impl Into<String>,
        store: Arc<S>,
        fetcher: Arc<dyn Fetcher>,
    ) -> CachedFetchBuilder<T, S> {
        CachedFetchBuilder {
            logical_name: logical_name.into(),
            store,
            fetcher,
            config: CachedFetchConfig::default(),
            options: FetchOptions::default(),
            clock: Arc::new(SystemClock),
            sync_across_contexts: true,
        }
    }

    /// The physical key this instance reads and writes.
    pub fn key(&self) -> &CacheKey {
        &self.inner.key
    }

    pub fn config(&self) -> &CachedFetchConfig {
        &self.inner.config
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> CacheState<T> {
        self.inner.snapshot()
    }

    /// Receiver notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<CacheState<T>> {
        self.inner.state.subscribe()
    }

    /// Wait until no fetch is in flight and return the settled state.
    pub async fn wait_until_idle(&self) -> CacheState<T> {
        let mut rx = self.inner.state.subscribe();
        let settled = match rx.wait_for(|state| !state.is_validating).await {
            Ok(state) => state.clone(),
            Err(_) => self.inner.snapshot(),
        };
        settled
    }

    /// Fetch from the network, superseding any fetch in flight.
    ///
    /// Returns the committed data, or `None` on failure or when a newer
    /// fetch took over. Failures land in `state().error`.
    pub async fn fetch(&self, background: bool) -> Option<T> {
        match self.inner.start_fetch(background).await {
            Ok(data) => data,
            Err(e) if e.is_cancelled() => None,
            Err(e) => {
                tracing::error!(key = %self.inner.key, error = %e, "Fetch task panicked");
                None
            }
        }
    }

    /// Foreground fetch for user-triggered refresh.
    pub async fn refetch(&self) -> Option<T> {
        self.fetch(false).await
    }

    /// Optimistic local write.
    ///
    /// `Some` abandons any fetch in flight, persists a fresh entry and shows
    /// it immediately without a network call. `None` behaves like
    /// [`CachedFetch::clear_cache`].
    pub async fn mutate(&self, value: Option<T>) {
        let Some(data) = value else {
            self.clear_cache().await;
            return;
        };

        self.inner.cancel_in_flight();
        let _writes = self.inner.writes.lock().await;

        let now = self.inner.clock.now_ms();
        self.inner.state.send_modify(|state| {
            state.data = Some(data.clone());
            state.source = Some(DataSource::Network);
            state.is_stale = false;
            state.is_loading = false;
            state.is_validating = false;
        });
        self.inner.persist(&data, now).await;
        tracing::debug!(key = %self.inner.key, "Mutated cache entry");
    }

    /// Drop the stored entry, mark the held data stale and refetch.
    pub async fn invalidate(&self) -> Option<T> {
        {
            let _writes = self.inner.writes.lock().await;
            self.inner.remove_entry().await;
        }
        self.inner.state.send_modify(|state| state.is_stale = true);
        tracing::debug!(key = %self.inner.key, "Invalidated cache entry");
        self.fetch(false).await
    }

    /// Drop the stored entry and reset the state to empty. Does not refetch.
    pub async fn clear_cache(&self) {
        self.inner.cancel_in_flight();
        let _writes = self.inner.writes.lock().await;
        self.inner.remove_entry().await;
        self.inner.state.send_replace(CacheState::empty());
        tracing::debug!(key = %self.inner.key, "Cleared cache entry");
    }

    /// Size, age and expiry of the stored entry.
    pub async fn cache_info(&self) -> CacheInfo {
        let raw = match self.inner.store.get(self.inner.key.as_str()).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return CacheInfo::empty(),
            Err(e) => {
                tracing::warn!(key = %self.inner.key, error = %e, "Failed to read cache entry");
                return CacheInfo::empty();
            }
        };

        let now = self.inner.clock.now_ms();
        match CacheEntry::<IgnoredAny>::decode(&raw) {
            Ok(entry) => CacheInfo {
                size: raw.len(),
                age_ms: entry.age_ms(now),
                is_expired: self.inner.policy.is_expired(Some(&entry), now),
            },
            Err(_) => CacheInfo {
                size: raw.len(),
                age_ms: 0,
                is_expired: true,
            },
        }
    }

    /// Tear the instance down. Equivalent to dropping it.
    pub fn dispose(self) {
        drop(self);
    }
}

impl<T, S> Drop for CachedFetch<T, S> {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
        self.inner.cancel_in_flight();
        tracing::debug!(key = %self.inner.key, "Cached fetch disposed");
    }
}

// ============================================================================
// BUILDER
// ============================================================================

/// Builder for [`CachedFetch`].
pub struct CachedFetchBuilder<T, S> {
    logical_name: String,
    store: Arc<S>,
    fetcher: Arc<dyn Fetcher>,
    config: CachedFetchConfig,
    options: FetchOptions<T>,
    clock: Arc<dyn Clock>,
    sync_across_contexts: bool,
}

impl<T, S> CachedFetchBuilder<T, S>
where
    T: Cacheable,
    S: KeyValueStore + 'static,
{
    pub fn config(mut self, config: CachedFetchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn options(mut self, options: FetchOptions<T>) -> Self {
        self.options = options;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Follow writes made to the same key by other store contexts (default on).
    pub fn sync_across_contexts(mut self, enabled: bool) -> Self {
        self.sync_across_contexts = enabled;
        self
    }

    /// Validate the config, derive the physical key, load the stored entry
    /// and start the background tasks.
    ///
    /// Must be called inside a tokio runtime.
    pub async fn mount(self) -> RevalidateResult<CachedFetch<T, S>> {
        self.config.validate()?;

        let key = CacheKey::derive(&self.logical_name, &self.fetcher.identity());
        let (state, _) = watch::channel(CacheState::empty());
        let (shutdown, _) = watch::channel(false);

        let inner = Arc::new(Inner {
            policy: FreshnessPolicy::new(self.config.cache_time),
            key,
            store: self.store,
            fetcher: self.fetcher,
            config: self.config,
            options: self.options,
            clock: self.clock,
            state,
            generation: AtomicU64::new(0),
            in_flight: Mutex::new(None),
            writes: AsyncMutex::new(()),
        });

        // Subscribe before the first read so no external write is missed.
        if self.sync_across_contexts {
            let subscription = inner.store.subscribe(inner.key.as_str());
            tokio::spawn(tasks::sync_listener(
                Arc::downgrade(&inner),
                subscription,
                shutdown.subscribe(),
            ));
        }

        inner.initialize().await;

        if inner.config.refresh_timer_enabled() {
            tokio::spawn(tasks::refresh_timer(
                Arc::downgrade(&inner),
                inner.config.refresh_interval,
                shutdown.subscribe(),
            ));
        }

        tracing::debug!(
            key = %inner.key,
            cache_time_ms = inner.config.cache_time.as_millis() as u64,
            stale_while_revalidate = inner.config.stale_while_revalidate,
            "Mounted cached fetch"
        );

        Ok(CachedFetch { inner, shutdown })
    }
}
