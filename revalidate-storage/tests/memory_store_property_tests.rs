//! Property tests for the in-memory store.

use proptest::prelude::*;
use revalidate_storage::{KeyValueStore, MemoryStore};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime should build")
}

fn arb_writes() -> impl Strategy<Value = Vec<(String, String)>> {
    prop::collection::vec(("[a-d]", "[a-z]{0,24}"), 1..40)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property 1: Stored bytes SHALL never exceed the quota, and a rejected
    /// write SHALL leave the previous value in place.
    #[test]
    fn prop_quota_is_never_exceeded(
        quota in 1u64..120,
        writes in arb_writes(),
    ) {
        let outcome: Result<(), TestCaseError> = runtime().block_on(async {
            let store = MemoryStore::with_quota(quota);
            let mut rejected = 0u64;

            for (key, value) in &writes {
                let before = store.get(key).await.expect("get should succeed");
                match store.set(key, value).await {
                    Ok(()) => {
                        let after = store.get(key).await.expect("get should succeed");
                        prop_assert_eq!(after.as_deref(), Some(value.as_str()));
                    }
                    Err(e) => {
                        prop_assert!(e.is_quota_exceeded());
                        rejected += 1;
                        let after = store.get(key).await.expect("get should succeed");
                        prop_assert_eq!(after, before);
                    }
                }

                let stats = store.stats().await.expect("stats should succeed");
                prop_assert!(stats.bytes <= quota);
            }

            let stats = store.stats().await.expect("stats should succeed");
            prop_assert_eq!(stats.quota_rejections, rejected);
            Ok(())
        });
        outcome?;
    }

    /// Property 2: The last successful write to a key SHALL be visible from
    /// every context.
    #[test]
    fn prop_contexts_see_last_write(writes in arb_writes()) {
        let outcome: Result<(), TestCaseError> = runtime().block_on(async {
            let tab_a = MemoryStore::new();
            let tab_b = tab_a.context();

            for (i, (key, value)) in writes.iter().enumerate() {
                let writer = if i % 2 == 0 { &tab_a } else { &tab_b };
                writer.set(key, value).await.expect("set should succeed");
            }

            for (key, _) in &writes {
                let expected = writes
                    .iter()
                    .rev()
                    .find(|(k, _)| k == key)
                    .map(|(_, v)| v.clone());
                prop_assert_eq!(tab_a.get(key).await.expect("get should succeed"), expected.clone());
                prop_assert_eq!(tab_b.get(key).await.expect("get should succeed"), expected);
            }
            Ok(())
        });
        outcome?;
    }
}
