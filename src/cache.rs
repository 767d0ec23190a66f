//! Per-consumer seen-cache.
//!
//! Bounded LRU with per-entry expiry mapping a finding's count key to the
//! number of times this replica observed it. Used only to avoid a second
//! store increment for a finding this replica already counted; a missing
//! entry means "ask the store".

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;

/// Default capacity of the seen-cache.
pub const DEFAULT_CAPACITY: usize = 125;
/// Default entry lifetime of the seen-cache.
pub const DEFAULT_TTL: Duration = Duration::from_secs(10 * 60);

struct Entry {
    count: u32,
    expires_at: Instant,
}

pub struct SeenCache {
    entries: LruCache<String, Entry>,
    ttl: Duration,
}

impl SeenCache {
    /// Create a cache; a zero capacity is bumped to one.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            ttl,
        }
    }

    pub fn contains(&mut self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Look up a live entry, dropping it when expired.
    pub fn get(&mut self, key: &str) -> Option<u32> {
        let now = Instant::now();
        let (count, live) = self
            .entries
            .get(key)
            .map(|entry| (entry.count, entry.expires_at > now))?;
        if !live {
            self.entries.pop(key);
            return None;
        }
        Some(count)
    }

    /// Insert or overwrite an entry, refreshing its lifetime.
    pub fn add(&mut self, key: impl Into<String>, count: u32) {
        self.entries.put(
            key.into(),
            Entry {
                count,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    pub fn remove(&mut self, key: &str) -> Option<u32> {
        self.entries.pop(key).map(|entry| entry.count)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for SeenCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TTL)
    }
}
