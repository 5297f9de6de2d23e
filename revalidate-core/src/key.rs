//! Physical cache-key derivation.
//!
//! A logical name alone is not enough to address a cache slot: two fetchers
//! sharing a name but hitting different endpoints must not read each other's
//! entries. The physical key therefore carries a digest of the fetcher's
//! identity string (endpoint, method, params).
//!
//! The digest is truncated to 64 bits. It decorrelates distinct fetchers in
//! the common case but makes no collision-resistance promise.

use std::fmt;

/// Separator between the logical name and the identity digest.
const SEPARATOR: char = ':';

/// Number of digest bytes kept in the physical key.
const DIGEST_BYTES: usize = 8;

/// A derived storage key.
///
/// Only constructible through [`CacheKey::derive`], so every physical key in
/// the store is bound to a fetch identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    logical: String,
    physical: String,
}

impl CacheKey {
    /// Derive the physical key for `logical_name` and a fetcher identity.
    ///
    /// Deterministic: the same inputs always produce the same key, across
    /// processes and restarts.
    pub fn derive(logical_name: &str, identity: &str) -> Self {
        let digest = identity_digest(identity);
        let physical = format!("{logical_name}{SEPARATOR}{digest}");
        Self {
            logical: logical_name.to_string(),
            physical,
        }
    }

    /// The caller-chosen logical name.
    pub fn logical_name(&self) -> &str {
        &self.logical
    }

    /// The hex digest of the fetcher identity.
    pub fn digest(&self) -> &str {
        &self.physical[self.logical.len() + SEPARATOR.len_utf8()..]
    }

    /// The key used in the persistent store.
    pub fn as_str(&self) -> &str {
        &self.physical
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.physical)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.physical
    }
}

fn identity_digest(identity: &str) -> String {
    let hash = blake3::hash(identity.as_bytes());
    hex::encode(&hash.as_bytes()[..DIGEST_BYTES])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_is_deterministic() {
        let a = CacheKey::derive("users", "GET https://api.example.com/users");
        let b = CacheKey::derive("users", "GET https://api.example.com/users");
        assert_eq!(a, b);
        assert_eq!(a.as_str(), b.as_str());
    }

    #[test]
    fn test_different_identity_different_slot() {
        let a = CacheKey::derive("users", "GET https://api.example.com/users?page=1");
        let b = CacheKey::derive("users", "GET https://api.example.com/users?page=2");
        assert_ne!(a.as_str(), b.as_str());
        assert_eq!(a.logical_name(), b.logical_name());
    }

    #[test]
    fn test_physical_layout() {
        let key = CacheKey::derive("profile", "identity");
        assert!(key.as_str().starts_with("profile:"));
        assert_eq!(key.digest().len(), DIGEST_BYTES * 2);
        assert!(key.digest().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(key.to_string(), key.as_str());
    }

    #[test]
    fn test_logical_name_with_separator() {
        let key = CacheKey::derive("a:b", "x");
        assert_eq!(key.logical_name(), "a:b");
        assert_eq!(key.digest().len(), DIGEST_BYTES * 2);
    }
}
