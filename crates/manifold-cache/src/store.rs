use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

struct CacheEntry {
    /// Serialized response body; returned byte-identical on a hit.
    body: String,
    expires_at: Instant,
}

/// In-process key-value store for cached responses. Entries expire lazily
/// on read; the store never blocks an async task.
pub struct ResponseCache {
    key_prefix: String,
    entries: DashMap<String, CacheEntry>,
}

impl ResponseCache {
    pub fn new(key_prefix: impl Into<String>) -> Self {
        Self {
            key_prefix: key_prefix.into(),
            entries: DashMap::new(),
        }
    }

    fn key(&self, fingerprint: &str) -> String {
        format!("{}{}", self.key_prefix, fingerprint)
    }

    /// Stored body for a fingerprint, or `None` if absent or expired.
    pub fn get(&self, fingerprint: &str) -> Option<String> {
        let key = self.key(fingerprint);
        let expired = match self.entries.get(&key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                debug!(%key, "cache hit");
                return Some(entry.body.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(&key);
        }
        None
    }

    pub fn put(&self, fingerprint: &str, body: String, ttl: Duration) {
        let key = self.key(fingerprint);
        debug!(%key, ttl_secs = ttl.as_secs(), "cache write");
        self.entries.insert(
            key,
            CacheEntry {
                body,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
