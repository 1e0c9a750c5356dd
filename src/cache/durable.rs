// Best-effort TTL cache over a host-provided raw key/value store.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{Config, ConfigTrait, DEFAULT_NAMESPACE};
use crate::dedlog;
use crate::metrics;
use crate::time::{self, Clock};

use super::counters::Counters;
use super::store::RawStore;
use super::{Cache, CacheStats, Lookup, ReadMode};

#[derive(Serialize, Deserialize)]
struct Envelope<V> {
    created_at: i64,
    ttl_ms: i64,
    seq: u64,
    value: V,
}

impl<V> Envelope<V> {
    fn is_fresh(&self, now: i64) -> bool {
        now.saturating_sub(self.created_at) <= self.ttl_ms
    }
}

/// Envelope header without the value, used for eviction ordering.
#[derive(Deserialize)]
struct EnvelopeMeta {
    created_at: i64,
    seq: u64,
}

/// Durable cache adapter. Store faults degrade to misses and dropped writes;
/// nothing here returns an error to the caller.
pub struct DurableCacheAdapter {
    store: Arc<dyn RawStore>,
    namespace: String,
    ttl: Duration,
    max_entries: Option<usize>,
    mode: ReadMode,
    clock: Arc<dyn Clock>,
    seq: AtomicU64,
    degraded: AtomicBool,
    counters: Counters,
}

impl DurableCacheAdapter {
    pub fn new(store: Arc<dyn RawStore>, namespace: impl Into<String>, ttl: Duration) -> Self {
        let clock = time::system();
        Self {
            store,
            namespace: namespace.into(),
            ttl,
            max_entries: None,
            mode: ReadMode::Evict,
            seq: AtomicU64::new(0),
            clock,
            degraded: AtomicBool::new(false),
            counters: Counters::new(),
        }
    }

    /// Creates an adapter from the `durable` config section.
    pub fn from_config(cfg: &Config, store: Arc<dyn RawStore>) -> Self {
        let durable = cfg.durable();
        let namespace = durable
            .and_then(|d| d.namespace.clone())
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
        let ttl = durable.and_then(|d| d.ttl).unwrap_or_else(|| cfg.cache_ttl());
        let mut adapter = Self::new(store, namespace, ttl).with_read_mode(cfg.cache_mode());
        if let Some(max) = durable.and_then(|d| d.max_entries) {
            adapter = adapter.with_max_entries(max);
        }
        adapter
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries.max(1));
        self
    }

    pub fn with_read_mode(mut self, mode: ReadMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn raw_key(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }

    fn prefix(&self) -> String {
        format!("{}:", self.namespace)
    }

    /// Keys that belong to this namespace. A listing failure yields none.
    fn own_keys(&self) -> Vec<String> {
        let prefix = self.prefix();
        match self.store.raw_keys() {
            Ok(keys) => keys.into_iter().filter(|k| k.starts_with(&prefix)).collect(),
            Err(e) => {
                dedlog::err(Some(&e), None, "durable cache: listing keys failed");
                Vec::new()
            }
        }
    }

    fn read<V: DeserializeOwned>(&self, key: &str) -> Option<Envelope<V>> {
        let raw_key = self.raw_key(key);
        let raw = match self.store.raw_get(&raw_key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                dedlog::err(Some(&e), Some(key), "durable cache: read failed");
                return None;
            }
        };

        match serde_json::from_str::<Envelope<V>>(&raw) {
            Ok(envelope) => Some(envelope),
            Err(e) => {
                Counters::inc(&self.counters.corrupt);
                metrics::add_durable_corrupt();
                dedlog::err(Some(&e), Some(key), "durable cache: corrupt entry treated as miss");
                let _ = self.store.raw_delete(&raw_key);
                None
            }
        }
    }

    fn write_failed(&self, key: &str, err: &dyn std::error::Error) {
        Counters::inc(&self.counters.write_failures);
        metrics::add_durable_write_failure();
        if !self.degraded.swap(true, Ordering::Relaxed) {
            warn!(
                component = "durable",
                event = "degraded",
                namespace = %self.namespace,
                error = %err,
                "durable cache writes are failing, continuing as pass-through"
            );
        }
        dedlog::err(Some(err), Some(key), "durable cache: write dropped");
    }

    /// Evicts oldest-written entries until the namespace is within `max_entries`.
    fn enforce_limit(&self) {
        let Some(max) = self.max_entries else {
            return;
        };
        let keys = self.own_keys();
        if keys.len() <= max {
            return;
        }

        let mut aged: Vec<((i64, u64), String)> = Vec::with_capacity(keys.len());
        for raw_key in keys {
            let order = self
                .store
                .raw_get(&raw_key)
                .ok()
                .flatten()
                .and_then(|raw| serde_json::from_str::<EnvelopeMeta>(&raw).ok())
                .map(|m| (m.created_at, m.seq))
                // Unreadable entries go first.
                .unwrap_or((i64::MIN, 0));
            aged.push((order, raw_key));
        }
        aged.sort();

        let excess = aged.len() - max;
        let mut evicted = 0u64;
        for (_, raw_key) in aged.into_iter().take(excess) {
            if self.store.raw_delete(&raw_key).is_ok() {
                evicted += 1;
            }
        }
        Counters::add(&self.counters.evictions, evicted);
        debug!(
            component = "durable",
            event = "evicted",
            items = evicted,
            max_entries = max,
            "durable cache over capacity, evicted oldest entries"
        );
    }
}

impl<V> Cache<V> for DurableCacheAdapter
where
    V: Serialize + DeserializeOwned + Send + Sync,
{
    fn lookup(&self, key: &str) -> Option<Lookup<V>> {
        let Some(envelope) = self.read::<V>(key) else {
            Counters::inc(&self.counters.misses);
            return None;
        };

        if envelope.is_fresh(self.clock.now_millis()) {
            Counters::inc(&self.counters.hits);
            return Some(Lookup::Fresh(envelope.value));
        }

        match self.mode {
            ReadMode::Evict => {
                let _ = self.store.raw_delete(&self.raw_key(key));
                Counters::inc(&self.counters.expirations);
                Counters::inc(&self.counters.misses);
                None
            }
            ReadMode::StaleWhileRevalidate => {
                Counters::inc(&self.counters.stale_hits);
                Some(Lookup::Stale(envelope.value))
            }
        }
    }

    fn set(&self, key: &str, value: V) {
        Cache::set_with_ttl(self, key, value, self.ttl);
    }

    fn set_with_ttl(&self, key: &str, value: V, ttl: Duration) {
        let envelope = Envelope {
            created_at: self.clock.now_millis(),
            ttl_ms: time::millis(ttl),
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            value,
        };
        let raw = match serde_json::to_string(&envelope) {
            Ok(raw) => raw,
            Err(e) => {
                self.write_failed(key, &e);
                return;
            }
        };

        match self.store.raw_set(&self.raw_key(key), raw) {
            Ok(()) => {
                self.degraded.store(false, Ordering::Relaxed);
                self.enforce_limit();
            }
            Err(e) => self.write_failed(key, &e),
        }
    }

    fn has(&self, key: &str) -> bool {
        // Corrupt entries are left for the next lookup to count and remove.
        let Ok(Some(raw)) = self.store.raw_get(&self.raw_key(key)) else {
            return false;
        };
        match serde_json::from_str::<Envelope<V>>(&raw) {
            Ok(envelope) => {
                envelope.is_fresh(self.clock.now_millis())
                    || self.mode == ReadMode::StaleWhileRevalidate
            }
            Err(_) => false,
        }
    }

    fn delete(&self, key: &str) -> bool {
        let raw_key = self.raw_key(key);
        let existed = matches!(self.store.raw_get(&raw_key), Ok(Some(_)));
        if let Err(e) = self.store.raw_delete(&raw_key) {
            dedlog::err(Some(&e), Some(key), "durable cache: delete failed");
            return false;
        }
        existed
    }

    fn clear(&self) {
        for raw_key in self.own_keys() {
            if let Err(e) = self.store.raw_delete(&raw_key) {
                dedlog::err(Some(&e), Some(&raw_key), "durable cache: delete failed");
            }
        }
    }

    fn stats(&self) -> CacheStats {
        let keys = self.own_keys();
        let bytes = keys
            .iter()
            .filter_map(|k| self.store.raw_get(k).ok().flatten().map(|v| k.len() + v.len()))
            .sum();
        CacheStats {
            entries: keys.len(),
            bytes,
            hits: Counters::load(&self.counters.hits),
            stale_hits: Counters::load(&self.counters.stale_hits),
            misses: Counters::load(&self.counters.misses),
            evictions: Counters::load(&self.counters.evictions),
            expirations: Counters::load(&self.counters.expirations),
            corrupt: Counters::load(&self.counters.corrupt),
            write_failures: Counters::load(&self.counters.write_failures),
            degraded: self.degraded.load(Ordering::Relaxed),
        }
    }

    fn read_mode(&self) -> ReadMode {
        self.mode
    }
}
