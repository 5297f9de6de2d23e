//! Freshness policy for stored cache entries.
//!
//! Decides whether a persisted [`CacheEntry`] may be served. The checks are
//! independent; any failing check makes the entry unusable.

use std::time::Duration;

use crate::{CacheEntry, EpochMillis};

/// Why an entry was accepted or rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Entry may be served.
    Fresh,
    /// No entry stored.
    Missing,
    /// `now` is past the entry's hard expiry.
    Expired,
    /// Entry is older than the configured cache time.
    TooOld,
    /// The caller's validator rejected the data.
    Rejected,
}

impl Verdict {
    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::Missing => "missing",
            Self::Expired => "expired",
            Self::TooOld => "too_old",
            Self::Rejected => "rejected",
        }
    }
}

/// Age/expiry/validator policy for cache entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessPolicy {
    cache_time: Duration,
}

impl FreshnessPolicy {
    pub fn new(cache_time: Duration) -> Self {
        Self { cache_time }
    }

    pub fn cache_time(&self) -> Duration {
        self.cache_time
    }

    fn cache_time_ms(&self) -> i64 {
        i64::try_from(self.cache_time.as_millis()).unwrap_or(i64::MAX)
    }

    /// Evaluate an entry at instant `now`.
    pub fn evaluate<T>(
        &self,
        entry: Option<&CacheEntry<T>>,
        now: EpochMillis,
        validator: Option<&dyn Fn(&T) -> bool>,
    ) -> Verdict {
        let Some(entry) = entry else {
            return Verdict::Missing;
        };

        if entry.is_past_expiry(now) {
            return Verdict::Expired;
        }

        if now.saturating_sub(entry.timestamp()) > self.cache_time_ms() {
            return Verdict::TooOld;
        }

        if let Some(validator) = validator {
            if !validator(entry.data()) {
                return Verdict::Rejected;
            }
        }

        Verdict::Fresh
    }

    /// Whether an entry may be served at instant `now`.
    pub fn is_valid<T>(
        &self,
        entry: Option<&CacheEntry<T>>,
        now: EpochMillis,
        validator: Option<&dyn Fn(&T) -> bool>,
    ) -> bool {
        self.evaluate(entry, now, validator).is_fresh()
    }

    /// Expiry ignoring any validator: missing, past hard expiry, or too old.
    pub fn is_expired<T>(&self, entry: Option<&CacheEntry<T>>, now: EpochMillis) -> bool {
        !self.evaluate(entry, now, None).is_fresh()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy_ms(ms: u64) -> FreshnessPolicy {
        FreshnessPolicy::new(Duration::from_millis(ms))
    }

    #[test]
    fn test_missing_entry_is_invalid() {
        let policy = policy_ms(1000);
        assert_eq!(policy.evaluate::<u32>(None, 0, None), Verdict::Missing);
        assert!(!policy.is_valid::<u32>(None, 0, None));
    }

    #[test]
    fn test_fresh_within_cache_time() {
        let policy = policy_ms(1000);
        let entry = CacheEntry::written_at("A", 0, None);
        assert!(policy.is_valid(Some(&entry), 500, None));
        // Boundary is inclusive
        assert!(policy.is_valid(Some(&entry), 1000, None));
        assert_eq!(policy.evaluate(Some(&entry), 1001, None), Verdict::TooOld);
    }

    #[test]
    fn test_hard_expiry_wins() {
        let policy = policy_ms(10_000);
        let entry = CacheEntry::written_at("A", 0, Some(Duration::from_millis(100)));
        assert!(policy.is_valid(Some(&entry), 100, None));
        assert_eq!(policy.evaluate(Some(&entry), 101, None), Verdict::Expired);
    }

    #[test]
    fn test_validator_rejects() {
        let policy = policy_ms(1000);
        let entry = CacheEntry::written_at(3u32, 0, None);
        let even = |v: &u32| v % 2 == 0;
        assert_eq!(
            policy.evaluate(Some(&entry), 10, Some(&even)),
            Verdict::Rejected
        );
        let odd = |v: &u32| v % 2 == 1;
        assert!(policy.is_valid(Some(&entry), 10, Some(&odd)));
    }

    #[test]
    fn test_is_expired_ignores_validator() {
        let policy = policy_ms(1000);
        let entry = CacheEntry::written_at(3u32, 0, None);
        assert!(!policy.is_expired(Some(&entry), 10));
        assert!(policy.is_expired(Some(&entry), 5000));
        assert!(policy.is_expired::<u32>(None, 0));
    }

    #[test]
    fn test_verdict_names() {
        assert_eq!(Verdict::TooOld.as_str(), "too_old");
        assert!(Verdict::Fresh.is_fresh());
        assert!(!Verdict::Rejected.is_fresh());
    }
}
