// Cache entry model.

use std::time::Duration;

use crate::time;

/// A stored value with its write timestamp and ttl.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    /// Unix millis at write time.
    pub created_at: i64,
    pub ttl_ms: i64,
    /// Write sequence; lower means written earlier.
    pub seq: u64,
    /// Approximate footprint, diagnostics only.
    pub weight: usize,
}

impl<V> CacheEntry<V> {
    pub fn new(value: V, created_at: i64, ttl: Duration, seq: u64, weight: usize) -> Self {
        Self {
            value,
            created_at,
            ttl_ms: time::millis(ttl),
            seq,
            weight,
        }
    }

    /// Fresh iff `now - created_at <= ttl`.
    pub fn is_fresh(&self, now: i64) -> bool {
        now.saturating_sub(self.created_at) <= self.ttl_ms
    }

    pub fn age_ms(&self, now: i64) -> i64 {
        now.saturating_sub(self.created_at).max(0)
    }
}
