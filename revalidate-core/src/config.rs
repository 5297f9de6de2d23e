//! Configuration types

use crate::{ConfigError, RevalidateError, RevalidateResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Serializable options for a cached fetch.
///
/// Closure-valued options (transform, validate, callbacks) are attached
/// separately on the fetch builder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedFetchConfig {
    /// How long a stored entry stays usable.
    pub cache_time: Duration,
    /// Serve valid cached data immediately and refresh in the background.
    pub stale_while_revalidate: bool,
    /// Periodically refresh held data.
    pub background_refresh: bool,
    /// Period of the background refresh timer. Zero disables the timer.
    pub refresh_interval: Duration,
    /// Timeout raced against each fetch. Zero disables the race.
    pub timeout: Duration,
    /// Extra request headers handed to the fetcher.
    pub headers: BTreeMap<String, String>,
}

impl Default for CachedFetchConfig {
    fn default() -> Self {
        Self {
            cache_time: Duration::from_millis(300_000),
            stale_while_revalidate: true,
            background_refresh: false,
            refresh_interval: Duration::from_millis(1_800_000),
            timeout: Duration::from_millis(10_000),
            headers: BTreeMap::new(),
        }
    }
}

impl CachedFetchConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache_time(mut self, cache_time: Duration) -> Self {
        self.cache_time = cache_time;
        self
    }

    pub fn with_stale_while_revalidate(mut self, enabled: bool) -> Self {
        self.stale_while_revalidate = enabled;
        self
    }

    /// Enable the refresh timer with the given period.
    pub fn with_background_refresh(mut self, interval: Duration) -> Self {
        self.background_refresh = true;
        self.refresh_interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// True when the refresh timer should run.
    pub fn refresh_timer_enabled(&self) -> bool {
        self.background_refresh && !self.refresh_interval.is_zero()
    }

    /// The timeout to race against, if any.
    pub fn effective_timeout(&self) -> Option<Duration> {
        (!self.timeout.is_zero()).then_some(self.timeout)
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - cache_time is positive
    /// - header names are non-empty
    pub fn validate(&self) -> RevalidateResult<()> {
        if self.cache_time.is_zero() {
            return Err(RevalidateError::Config(ConfigError::InvalidValue {
                field: "cache_time".to_string(),
                value: format!("{:?}", self.cache_time),
                reason: "cache_time must be positive".to_string(),
            }));
        }

        if let Some(name) = self.headers.keys().find(|name| name.trim().is_empty()) {
            return Err(RevalidateError::Config(ConfigError::InvalidValue {
                field: "headers".to_string(),
                value: format!("{name:?}"),
                reason: "header names must be non-empty".to_string(),
            }));
        }

        Ok(())
    }

    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `REVALIDATE_CACHE_TIME_MS` (default: 300000)
    /// - `REVALIDATE_STALE_WHILE_REVALIDATE` (default: true)
    /// - `REVALIDATE_BACKGROUND_REFRESH` (default: false)
    /// - `REVALIDATE_REFRESH_INTERVAL_MS` (default: 1800000)
    /// - `REVALIDATE_TIMEOUT_MS` (default: 10000)
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let millis = |name: &str, fallback: Duration| {
            lookup(name)
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(fallback)
        };
        let flag = |name: &str, fallback: bool| {
            lookup(name)
                .map(|s| s == "true" || s == "1")
                .unwrap_or(fallback)
        };

        Self {
            cache_time: millis("REVALIDATE_CACHE_TIME_MS", defaults.cache_time),
            stale_while_revalidate: flag(
                "REVALIDATE_STALE_WHILE_REVALIDATE",
                defaults.stale_while_revalidate,
            ),
            background_refresh: flag("REVALIDATE_BACKGROUND_REFRESH", defaults.background_refresh),
            refresh_interval: millis("REVALIDATE_REFRESH_INTERVAL_MS", defaults.refresh_interval),
            timeout: millis("REVALIDATE_TIMEOUT_MS", defaults.timeout),
            headers: defaults.headers,
        }
    }
}
