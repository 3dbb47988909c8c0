//! ResponseCache: TTL-keyed store of previously fetched payloads.
//!
//! Eviction is lazy: an entry past its TTL is removed the next time it is
//! read. Losing the contents only costs freshness, never correctness.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use super::key::CacheKey;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    payload: V,
    stored_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) < self.ttl
    }
}

/// In-memory response cache with per-entry TTL.
pub struct ResponseCache<V> {
    entries: Mutex<HashMap<CacheKey, CacheEntry<V>>>,
}

impl<V: Clone> ResponseCache<V> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<CacheKey, CacheEntry<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the payload for `key` if it is still fresh. A stale entry is
    /// dropped on the way out.
    pub fn get(&self, key: &CacheKey) -> Option<V> {
        let mut entries = self.entries();
        let now = Instant::now();

        match entries.get(key) {
            Some(entry) if entry.is_fresh(now) => {
                debug!(key = %key, "Cache hit");
                Some(entry.payload.clone())
            }
            Some(_) => {
                debug!(key = %key, "Cache entry expired");
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Store `payload` under `key`, replacing any previous entry.
    pub fn set(&self, key: CacheKey, payload: V, ttl: Duration) {
        let entry = CacheEntry {
            payload,
            stored_at: Instant::now(),
            ttl,
        };
        self.entries().insert(key, entry);
    }

    /// Remove every entry whose key contains `pattern`, or everything when
    /// `pattern` is `None`. Returns the number of entries removed.
    pub fn invalidate(&self, pattern: Option<&str>) -> usize {
        let mut entries = self.entries();
        let before = entries.len();
        match pattern {
            Some(pattern) => entries.retain(|key, _| !key.matches(pattern)),
            None => entries.clear(),
        }
        let removed = before - entries.len();
        if removed > 0 {
            debug!(pattern = ?pattern, removed, "Cache invalidated");
        }
        removed
    }

    /// Number of stored entries, fresh or not.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

impl<V: Clone> Default for ResponseCache<V> {
    fn default() -> Self {
        Self::new()
    }
}
