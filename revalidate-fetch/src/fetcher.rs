//! Fetcher seam: the user-supplied network call.

use std::collections::BTreeMap;
use std::future::Future;

use async_trait::async_trait;
use revalidate_core::FetchError;
use serde_json::Value;

/// Per-call context handed to a [`Fetcher`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchRequest {
    /// Headers from the cache configuration.
    pub headers: BTreeMap<String, String>,
    /// True for silent refreshes that do not signal loading.
    pub background: bool,
    /// Generation number of this fetch within its cache instance.
    pub generation: u64,
}

/// Source of fresh data for a cache instance.
///
/// Failures should be tagged at the source with the matching
/// [`FetchError`] constructor; use [`FetchError::classify`] only when all
/// that is available is an opaque message.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Perform the fetch and return the raw payload.
    async fn fetch(&self, request: &FetchRequest) -> Result<Value, FetchError>;

    /// Stable description of what this fetcher retrieves (endpoint, method,
    /// parameters). Hashed into the physical cache key, so two fetchers with
    /// different identities never share a cache slot.
    fn identity(&self) -> String;
}

/// [`Fetcher`] built from an async closure.
pub struct FnFetcher<F> {
    identity: String,
    f: F,
}

impl<F> std::fmt::Debug for FnFetcher<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnFetcher")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

/// Wrap an async closure as a [`Fetcher`] with the given identity.
///
/// ```ignore
/// let fetcher = fetcher_fn("GET /users?page=1", |_req| async {
///     Ok(serde_json::json!([{"id": 1}]))
/// });
/// ```
pub fn fetcher_fn<F, Fut>(identity: impl Into<String>, f: F) -> FnFetcher<F>
where
    F: Fn(FetchRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, FetchError>> + Send,
{
    FnFetcher {
        identity: identity.into(),
        f,
    }
}

#[async_trait]
impl<F, Fut> Fetcher for FnFetcher<F>
where
    F: Fn(FetchRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, FetchError>> + Send,
{
    async fn fetch(&self, request: &FetchRequest) -> Result<Value, FetchError> {
        (self.f)(request.clone()).await
    }

    fn identity(&self) -> String {
        self.identity.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_fn_fetcher_passes_request() {
        let fetcher = fetcher_fn("echo", |req: FetchRequest| async move {
            Ok(json!({ "background": req.background, "generation": req.generation }))
        });

        let request = FetchRequest {
            background: true,
            generation: 7,
            ..FetchRequest::default()
        };
        let value = fetcher.fetch(&request).await.unwrap();
        assert_eq!(value, json!({ "background": true, "generation": 7 }));
        assert_eq!(fetcher.identity(), "echo");
    }

    #[tokio::test]
    async fn test_fn_fetcher_propagates_error() {
        let fetcher = fetcher_fn("down", |_req| async { Err(FetchError::network("offline")) });
        let err = fetcher.fetch(&FetchRequest::default()).await.unwrap_err();
        assert_eq!(err, FetchError::network("offline"));
    }
}
