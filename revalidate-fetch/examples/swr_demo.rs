//! Fetch a JSON endpoint through an LMDB-backed stale-while-revalidate cache.
//!
//! ```text
//! cargo run -p revalidate-fetch --example swr_demo -- https://httpbin.org/json /tmp/swr-demo
//! ```
//!
//! Run it twice: the second run serves the stored entry immediately and
//! revalidates in the background.

use std::sync::Arc;
use std::time::Duration;

use revalidate_fetch::{
    init_tracing, CachedFetch, CachedFetchConfig, FetchOptions, HttpFetcher, KeyValueStore,
    LmdbStore, TelemetryConfig,
};
use serde_json::Value;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing(&TelemetryConfig::from_env())?;

    let mut args = std::env::args().skip(1);
    let url = args
        .next()
        .unwrap_or_else(|| "https://httpbin.org/json".to_string());
    let dir = args
        .next()
        .unwrap_or_else(|| std::env::temp_dir().join("swr-demo").display().to_string());

    let store = Arc::new(LmdbStore::open(&dir, 16)?);
    let config = CachedFetchConfig::from_env().with_timeout(Duration::from_secs(5));
    let options = FetchOptions::new().on_success(|_: &Value, from_cache| {
        tracing::info!(from_cache, "Data available");
    });

    let cached = CachedFetch::builder("demo", Arc::clone(&store), Arc::new(HttpFetcher::new(url)))
        .config(config)
        .options(options)
        .mount()
        .await?;

    let first = cached.state();
    println!("initial source: {:?}", first.source);

    let settled = cached.wait_until_idle().await;
    match (&settled.data, &settled.error) {
        (Some(data), _) => println!("{}", serde_json::to_string_pretty(data)?),
        (None, Some(error)) => println!("fetch failed: {error}"),
        (None, None) => println!("no data"),
    }

    println!("cache info: {:?}", cached.cache_info().await);
    println!("store stats: {:?}", store.stats().await?);
    Ok(())
}
