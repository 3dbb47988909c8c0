//! Canonical cache keys.

use std::fmt;

use sha2::{Digest, Sha256};

/// Hex characters of the body digest kept in a key.
const BODY_DIGEST_LEN: usize = 16;

/// Canonical identity of a logical request.
///
/// Built from method, normalized path, sorted query pairs and a digest of
/// the JSON body, so two logically identical requests always produce the
/// same key regardless of query-parameter order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(
        method: &str,
        path: &str,
        query: &[(String, String)],
        body: Option<&serde_json::Value>,
    ) -> Self {
        let mut key = format!("{} {}", method.to_ascii_uppercase(), normalize_path(path));

        if !query.is_empty() {
            let mut pairs: Vec<&(String, String)> = query.iter().collect();
            pairs.sort();
            let joined = pairs
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("&");
            key.push('?');
            key.push_str(&joined);
        }

        if let Some(body) = body {
            // serde_json objects are key-sorted, so this serialization is canonical.
            let digest = hex::encode(Sha256::digest(body.to_string().as_bytes()));
            key.push('#');
            key.push_str(&digest[..BODY_DIGEST_LEN]);
        }

        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this key falls under an invalidation pattern.
    /// The same key tagged with a credential epoch, so calls made under
    /// different credentials are never joined.
    pub(crate) fn scoped(&self, epoch: u64) -> CacheKey {
        CacheKey(format!("{} @{epoch}", self.0))
    }

    pub fn matches(&self, pattern: &str) -> bool {
        self.0.contains(pattern)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Leading slash, no trailing slash, no empty segments.
pub(crate) fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    format!("/{}", segments.join("/"))
}
