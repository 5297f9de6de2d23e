//! Error types for revalidate operations

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Persistent store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Quota exceeded writing {key}: needed {needed} bytes, limit {limit} bytes")]
    QuotaExceeded { key: String, needed: u64, limit: u64 },

    #[error("Store backend failure: {reason}")]
    Backend { reason: String },

    #[error("Store lock poisoned")]
    LockPoisoned,
}

impl StoreError {
    /// Returns true for the quota condition, which callers are allowed to swallow.
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, Self::QuotaExceeded { .. })
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all revalidate errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RevalidateError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),
}

/// Result type alias for revalidate operations.
pub type RevalidateResult<T> = Result<T, RevalidateError>;

// ============================================================================
// FETCH ERROR TAXONOMY
// ============================================================================

/// Closed taxonomy of fetch failures.
///
/// Serializes to the wire names consumers match on (`network_error`,
/// `timeout_error`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FetchErrorKind {
    #[serde(rename = "network_error")]
    Network,
    #[serde(rename = "timeout_error")]
    Timeout,
    /// Persistent entry or response body could not be decoded.
    #[serde(rename = "parse_error")]
    Parse,
    #[serde(rename = "validation_error")]
    Validation,
    #[serde(rename = "transform_error")]
    Transform,
    #[serde(rename = "unknown_error")]
    Unknown,
}

impl FetchErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network_error",
            Self::Timeout => "timeout_error",
            Self::Parse => "parse_error",
            Self::Validation => "validation_error",
            Self::Transform => "transform_error",
            Self::Unknown => "unknown_error",
        }
    }
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified fetch failure.
///
/// Boundaries that know what went wrong construct the tagged variant
/// directly (`FetchError::timeout`, `FetchError::validation`, ...).
/// [`FetchError::classify`] exists for fetchers that only have an opaque
/// message to offer.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Network, message)
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            FetchErrorKind::Timeout,
            format!("Request timeout after {}ms", after.as_millis()),
        )
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Parse, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Validation, message)
    }

    pub fn transform(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Transform, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Unknown, message)
    }

    /// Best-effort classification of an untagged failure message.
    ///
    /// Substring heuristic: "timeout" wins over "network", which wins over
    /// "validation". Transform failures are only recognised when a transform
    /// was actually configured. Anything else is `unknown_error`.
    pub fn classify(message: impl Into<String>, has_transform: bool) -> Self {
        let message = message.into();
        let lower = message.to_ascii_lowercase();

        let kind = if lower.contains("timeout") || lower.contains("timed out") {
            FetchErrorKind::Timeout
        } else if lower.contains("network") || lower.contains("connection") {
            FetchErrorKind::Network
        } else if lower.contains("validation") {
            FetchErrorKind::Validation
        } else if has_transform && lower.contains("transform") {
            FetchErrorKind::Transform
        } else if lower.contains("json") || lower.contains("parse") {
            FetchErrorKind::Parse
        } else {
            FetchErrorKind::Unknown
        };

        Self { kind, message }
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == FetchErrorKind::Timeout
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(e: serde_json::Error) -> Self {
        Self::parse(e.to_string())
    }
}

// =============================================================================
// TESTS
// =============================================================================
