// In-memory TTL result cache bounded by entry count.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::{Config, ConfigTrait};
use crate::metrics;
use crate::time::{self, Clock};

use super::counters::Counters;
use super::entry::CacheEntry;
use super::{Cache, CacheStats, Lookup, ReadMode};

struct Inner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    /// Write sequence -> key, oldest first.
    order: BTreeMap<u64, String>,
    next_seq: u64,
    bytes: usize,
}

impl<V> Inner<V> {
    fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.seq);
        self.bytes = self.bytes.saturating_sub(entry.weight);
        Some(entry)
    }

    fn remove_oldest(&mut self) -> Option<CacheEntry<V>> {
        let (_, key) = self.order.pop_first()?;
        let entry = self.entries.remove(&key)?;
        self.bytes = self.bytes.saturating_sub(entry.weight);
        Some(entry)
    }
}

/// TTL-bounded key/value store with oldest-write eviction.
pub struct ResultCache<V> {
    inner: Mutex<Inner<V>>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    max_entries: usize,
    mode: ReadMode,
    counters: Counters,
}

impl<V: Clone + Send + Sync> ResultCache<V> {
    /// Creates a cache using the system clock. `max_entries` is clamped to at least 1.
    pub fn new(ttl: Duration, max_entries: usize, mode: ReadMode) -> Self {
        Self::with_clock(ttl, max_entries, mode, time::system())
    }

    pub fn with_clock(
        ttl: Duration,
        max_entries: usize,
        mode: ReadMode,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: BTreeMap::new(),
                next_seq: 0,
                bytes: 0,
            }),
            clock,
            ttl,
            max_entries: max_entries.max(1),
            mode,
            counters: Counters::new(),
        }
    }

    /// Creates a cache from the `cache` config section.
    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.cache_ttl(), cfg.cache_max_entries(), cfg.cache_mode())
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every expired entry regardless of read mode. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock();
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| !e.is_fresh(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            inner.remove(key);
        }
        let n = expired.len();
        Counters::add(&self.counters.expirations, n as u64);
        n
    }

    fn weigh(key: &str) -> usize {
        key.len() + std::mem::size_of::<V>()
    }
}

impl<V: Clone + Send + Sync> Cache<V> for ResultCache<V> {
    fn lookup(&self, key: &str) -> Option<Lookup<V>> {
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock();

        let (fresh, value) = match inner.entries.get(key) {
            Some(entry) => (entry.is_fresh(now), entry.value.clone()),
            None => {
                Counters::inc(&self.counters.misses);
                metrics::add_cache_misses(1);
                return None;
            }
        };

        if fresh {
            Counters::inc(&self.counters.hits);
            metrics::add_cache_hits(1);
            return Some(Lookup::Fresh(value));
        }

        match self.mode {
            ReadMode::Evict => {
                inner.remove(key);
                Counters::inc(&self.counters.expirations);
                Counters::inc(&self.counters.misses);
                metrics::add_cache_misses(1);
                None
            }
            ReadMode::StaleWhileRevalidate => {
                Counters::inc(&self.counters.stale_hits);
                Some(Lookup::Stale(value))
            }
        }
    }

    fn set(&self, key: &str, value: V) {
        self.set_with_ttl(key, value, self.ttl);
    }

    fn set_with_ttl(&self, key: &str, value: V, ttl: Duration) {
        let now = self.clock.now_millis();
        let weight = Self::weigh(key);
        let mut inner = self.inner.lock();

        inner.remove(key);

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner
            .entries
            .insert(key.to_string(), CacheEntry::new(value, now, ttl, seq, weight));
        inner.order.insert(seq, key.to_string());
        inner.bytes += weight;

        let mut evicted = 0u64;
        while inner.entries.len() > self.max_entries {
            if inner.remove_oldest().is_none() {
                break;
            }
            evicted += 1;
        }
        if evicted > 0 {
            Counters::add(&self.counters.evictions, evicted);
            debug!(
                component = "cache",
                event = "evicted",
                items = evicted,
                max_entries = self.max_entries,
                "cache over capacity, evicted oldest entries"
            );
        }
    }

    fn has(&self, key: &str) -> bool {
        let now = self.clock.now_millis();
        let inner = self.inner.lock();
        match inner.entries.get(key) {
            Some(entry) => entry.is_fresh(now) || self.mode == ReadMode::StaleWhileRevalidate,
            None => false,
        }
    }

    fn delete(&self, key: &str) -> bool {
        self.inner.lock().remove(key).is_some()
    }

    fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
        inner.bytes = 0;
    }

    fn stats(&self) -> CacheStats {
        let (entries, bytes) = {
            let inner = self.inner.lock();
            (inner.entries.len(), inner.bytes)
        };
        CacheStats {
            entries,
            bytes,
            hits: Counters::load(&self.counters.hits),
            stale_hits: Counters::load(&self.counters.stale_hits),
            misses: Counters::load(&self.counters.misses),
            evictions: Counters::load(&self.counters.evictions),
            expirations: Counters::load(&self.counters.expirations),
            ..CacheStats::default()
        }
    }

    fn read_mode(&self) -> ReadMode {
        self.mode
    }
}
