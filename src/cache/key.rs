//! Request fingerprinting
//!
//! Derives a stable, filesystem-safe [`CacheKey`] from a URL and its request
//! headers. The key is the hex SHA-256 digest of a canonical JSON document, so
//! identical inputs always land on the same cache entry.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

/// Which parts of the URL take part in the fingerprint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FingerprintPolicy {
    /// Path and headers only. URLs that differ only in scheme, host or query
    /// share a cache entry.
    PathOnly,
    /// Scheme, host, port, path, query and headers.
    #[default]
    Origin,
}

/// Hex digest identifying one cached request
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Wraps an existing key, e.g. a file name listed from the store
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Canonical hash input. Field order is fixed by the struct and headers are
/// sorted by the `BTreeMap`.
#[derive(Serialize)]
struct FingerprintInput<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    scheme: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    host: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    port: Option<u16>,
    path: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    query: Option<&'a str>,
    headers: BTreeMap<&'a str, &'a str>,
}

/// Computes the cache key for a request
///
/// Pure and deterministic. A URL that cannot be parsed is hashed verbatim in
/// place of its path, so every input still yields a key.
pub fn fingerprint(
    url: &str,
    headers: &HashMap<String, String>,
    policy: FingerprintPolicy,
) -> CacheKey {
    let parsed = Url::parse(url).ok();
    let headers: BTreeMap<&str, &str> = headers
        .iter()
        .map(|(name, value)| (name.as_str(), value.as_str()))
        .collect();

    let input = match (&parsed, policy) {
        (None, _) => FingerprintInput {
            scheme: None,
            host: None,
            port: None,
            path: url,
            query: None,
            headers,
        },
        (Some(parsed), FingerprintPolicy::PathOnly) => FingerprintInput {
            scheme: None,
            host: None,
            port: None,
            path: parsed.path(),
            query: None,
            headers,
        },
        (Some(parsed), FingerprintPolicy::Origin) => FingerprintInput {
            scheme: Some(parsed.scheme()),
            host: parsed.host_str(),
            port: parsed.port_or_known_default(),
            path: parsed.path(),
            query: parsed.query(),
            headers,
        },
    };

    // Serializing string maps and scalars cannot fail
    let canonical = serde_json::to_vec(&input).unwrap_or_default();
    CacheKey(hex::encode(Sha256::digest(&canonical)))
}
