//! Property tests for the freshness policy and key derivation.

use proptest::prelude::*;
use revalidate_core::{CacheEntry, CacheKey, FreshnessPolicy, Verdict};
use std::time::Duration;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property 1: For any entry older than cache_time, is_valid() SHALL return
    /// false regardless of the validator.
    #[test]
    fn prop_entries_older_than_cache_time_are_invalid(
        written in 0i64..1_000_000,
        cache_time_ms in 1u64..100_000,
        extra in 1i64..100_000,
        accept in any::<bool>(),
    ) {
        let policy = FreshnessPolicy::new(Duration::from_millis(cache_time_ms));
        let entry = CacheEntry::written_at(0u32, written, None);
        let now = written + cache_time_ms as i64 + extra;
        let validator = move |_: &u32| accept;

        prop_assert!(!policy.is_valid(Some(&entry), now, Some(&validator)));
        prop_assert!(!policy.is_valid(Some(&entry), now, None));
    }

    /// Property 2: An entry past its hard expiry SHALL be invalid even while it
    /// is younger than cache_time.
    #[test]
    fn prop_expiry_precedes_age(
        written in 0i64..1_000_000,
        ttl_ms in 0u64..1_000,
        past in 1i64..1_000,
    ) {
        let policy = FreshnessPolicy::new(Duration::from_secs(3600));
        let entry = CacheEntry::written_at("x", written, Some(Duration::from_millis(ttl_ms)));
        let now = written + ttl_ms as i64 + past;

        prop_assert!(now - written < 3_600_000);
        prop_assert_eq!(policy.evaluate(Some(&entry), now, None), Verdict::Expired);
    }

    /// An entry within both bounds and accepted by the validator SHALL be valid.
    #[test]
    fn prop_young_entries_are_valid(
        written in 0i64..1_000_000,
        cache_time_ms in 1u64..100_000,
        age_fraction in 0.0f64..=1.0,
    ) {
        let policy = FreshnessPolicy::new(Duration::from_millis(cache_time_ms));
        let entry = CacheEntry::written_at(1u8, written, Some(Duration::from_millis(cache_time_ms)));
        let now = written + (cache_time_ms as f64 * age_fraction) as i64;

        prop_assert!(policy.is_valid(Some(&entry), now, None));
    }

    /// Written entries always satisfy expires >= timestamp.
    #[test]
    fn prop_expires_not_before_timestamp(
        written in any::<i64>(),
        ttl_ms in any::<u64>(),
    ) {
        let entry = CacheEntry::written_at((), written, Some(Duration::from_millis(ttl_ms)));
        prop_assert!(entry.expires().unwrap() >= entry.timestamp());
    }

    /// Key derivation SHALL be deterministic and keep the logical name.
    #[test]
    fn prop_key_derivation_deterministic(
        name in "[a-z][a-z0-9_:-]{0,20}",
        identity in ".{0,64}",
    ) {
        let a = CacheKey::derive(&name, &identity);
        let b = CacheKey::derive(&name, &identity);
        prop_assert_eq!(a.as_str(), b.as_str());
        prop_assert_eq!(a.logical_name(), name.as_str());
        prop_assert_eq!(a.digest().len(), 16);
    }
}
