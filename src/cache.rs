//! Key/value status cache
//!
//! The cache is the only state shared between the packaging thread, the
//! scheduler and status readers. Values are opaque JSON snapshots; each entry
//! carries its own time-to-live.

use moka::Expiry;
use moka::sync::Cache;
use std::time::{Duration, Instant};

/// A shared key/value store with per-entry expiry
pub trait StatusCache: Send + Sync {
    /// Value stored under `key`, None when missing or expired
    fn get(&self, key: &str) -> Option<String>;

    /// Store `value` under `key` for `ttl`, replacing any previous value
    fn put(&self, key: &str, value: String, ttl: Duration);

    /// Whether a live value exists for `key`
    fn is_cached(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Remove `key`
    fn remove(&self, key: &str);
}

#[derive(Clone)]
struct Entry {
    value: String,
    ttl: Duration,
}

struct PerEntryTtl;

impl Expiry<String, Entry> for PerEntryTtl {
    fn expire_after_create(&self, _key: &String, value: &Entry, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process [`StatusCache`] backed by a moka cache
#[derive(Clone)]
pub struct MemoryCache {
    inner: Cache<String, Entry>,
}

impl MemoryCache {
    /// Create a cache holding at most `max_entries` packages
    pub fn new(max_entries: u64) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_entries)
                .expire_after(PerEntryTtl)
                .build(),
        }
    }

    /// Number of live entries (approximate, see moka's `entry_count`)
    pub fn entry_count(&self) -> u64 {
        self.inner.run_pending_tasks();
        self.inner.entry_count()
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl StatusCache for MemoryCache {
    fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key).map(|entry| entry.value)
    }

    fn put(&self, key: &str, value: String, ttl: Duration) {
        self.inner.insert(key.to_string(), Entry { value, ttl });
    }

    fn remove(&self, key: &str) {
        self.inner.invalidate(key);
    }
}
