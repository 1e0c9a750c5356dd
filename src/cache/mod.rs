//! TTL caches: an in-memory result cache and a best-effort durable adapter.

pub mod counters;
pub mod durable;
pub mod entry;
pub mod memory;
pub mod store;
pub mod sweeper;


use serde::{Deserialize, Serialize};
use std::time::Duration;

// Re-export main types
pub use durable::DurableCacheAdapter;
pub use entry::CacheEntry;
pub use memory::ResultCache;
pub use store::{MemoryStore, RawStore};

/// What a read does with an expired entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadMode {
    /// Expired entries are deleted on read and reported as a miss.
    #[default]
    Evict,
    /// Expired entries are kept and returned marked stale until the next set.
    StaleWhileRevalidate,
}

/// A cache hit, fresh or stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<V> {
    Fresh(V),
    Stale(V),
}

impl<V> Lookup<V> {
    pub fn is_stale(&self) -> bool {
        matches!(self, Lookup::Stale(_))
    }

    pub fn into_value(self) -> V {
        match self {
            Lookup::Fresh(v) | Lookup::Stale(v) => v,
        }
    }
}

/// Point-in-time cache statistics. Byte figures are diagnostic only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub bytes: usize,
    pub hits: u64,
    pub stale_hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    /// Durable entries that failed to deserialize.
    pub corrupt: u64,
    /// Durable writes that were dropped.
    pub write_failures: u64,
    /// True while the durable store is rejecting writes.
    pub degraded: bool,
}

/// Key/value cache with TTL freshness.
pub trait Cache<V>: Send + Sync {
    /// Looks a key up, distinguishing fresh and stale hits.
    fn lookup(&self, key: &str) -> Option<Lookup<V>>;

    /// Returns the value if present and servable under the read mode.
    fn get(&self, key: &str) -> Option<V> {
        self.lookup(key).map(Lookup::into_value)
    }

    /// Stores a value with the cache's default ttl.
    fn set(&self, key: &str, value: V);

    /// Stores a value with an explicit ttl.
    fn set_with_ttl(&self, key: &str, value: V, ttl: Duration);

    /// Reports whether `get` would return a value. Never mutates.
    fn has(&self, key: &str) -> bool;

    /// Removes a key, returning whether it was present.
    fn delete(&self, key: &str) -> bool;

    /// Removes every entry.
    fn clear(&self);

    fn stats(&self) -> CacheStats;

    fn read_mode(&self) -> ReadMode;
}
