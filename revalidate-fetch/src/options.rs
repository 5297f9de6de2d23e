//! Per-instance hooks: transform, validate and outcome callbacks.

use std::fmt;
use std::sync::Arc;

use revalidate_core::FetchError;
use serde::de::DeserializeOwned;
use serde_json::Value;

pub type TransformFn<T> = Arc<dyn Fn(Value) -> Result<T, FetchError> + Send + Sync>;
pub type ValidateFn<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;
pub type SuccessFn<T> = Arc<dyn Fn(&T, bool) + Send + Sync>;
pub type ErrorFn = Arc<dyn Fn(&FetchError) + Send + Sync>;

/// Hooks applied to every fetch of a cache instance.
///
/// - `transform` turns the raw payload into `T`; without one the payload is
///   deserialized directly.
/// - `validate` gates both freshly fetched data and cached entries.
/// - `on_success` receives the data and whether it came from the cache.
/// - `on_error` receives every committed failure.
pub struct FetchOptions<T> {
    transform: Option<TransformFn<T>>,
    validate: Option<ValidateFn<T>>,
    on_success: Option<SuccessFn<T>>,
    on_error: Option<ErrorFn>,
}

impl<T> Default for FetchOptions<T> {
    fn default() -> Self {
        Self {
            transform: None,
            validate: None,
            on_success: None,
            on_error: None,
        }
    }
}

impl<T> Clone for FetchOptions<T> {
    fn clone(&self) -> Self {
        Self {
            transform: self.transform.clone(),
            validate: self.validate.clone(),
            on_success: self.on_success.clone(),
            on_error: self.on_error.clone(),
        }
    }
}

impl<T> fmt::Debug for FetchOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchOptions")
            .field("transform", &self.transform.is_some())
            .field("validate", &self.validate.is_some())
            .field("on_success", &self.on_success.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

impl<T> FetchOptions<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the payload transform. Its failures surface as `transform_error`.
    pub fn with_transform<F, E>(mut self, f: F) -> Self
    where
        F: Fn(Value) -> Result<T, E> + Send + Sync + 'static,
        E: fmt::Display,
    {
        self.transform = Some(Arc::new(move |raw| {
            f(raw).map_err(|e| FetchError::transform(e.to_string()))
        }));
        self
    }

    pub fn with_validate<F>(mut self, f: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.validate = Some(Arc::new(f));
        self
    }

    pub fn on_success<F>(mut self, f: F) -> Self
    where
        F: Fn(&T, bool) + Send + Sync + 'static,
    {
        self.on_success = Some(Arc::new(f));
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&FetchError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn has_transform(&self) -> bool {
        self.transform.is_some()
    }

    /// Validator as a plain predicate, for the freshness policy.
    pub fn validator(&self) -> Option<&dyn Fn(&T) -> bool> {
        self.validate
            .as_deref()
            .map(|f| f as &dyn Fn(&T) -> bool)
    }

    /// Reject data the validator refuses.
    pub fn check(&self, data: &T) -> Result<(), FetchError> {
        match &self.validate {
            Some(validate) if !validate(data) => {
                Err(FetchError::validation("Data validation failed"))
            }
            _ => Ok(()),
        }
    }

    pub(crate) fn notify_success(&self, data: &T, from_cache: bool) {
        if let Some(callback) = &self.on_success {
            callback(data, from_cache);
        }
    }

    pub(crate) fn notify_error(&self, error: &FetchError) {
        if let Some(callback) = &self.on_error {
            callback(error);
        }
    }
}

impl<T: DeserializeOwned> FetchOptions<T> {
    /// Turn a raw payload into `T` through the transform, or by
    /// deserializing it when no transform is set.
    pub fn decode(&self, raw: Value) -> Result<T, FetchError> {
        match &self.transform {
            Some(transform) => transform(raw),
            None => Ok(serde_json::from_value(raw)?),
        }
    }
}
