// Raw key/value media for the durable cache adapter.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::StoreError;

/// A persistent string key/value medium provided by the host.
pub trait RawStore: Send + Sync {
    fn raw_get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn raw_set(&self, key: &str, value: String) -> Result<(), StoreError>;

    fn raw_delete(&self, key: &str) -> Result<(), StoreError>;

    /// Lists every key currently held by the medium.
    fn raw_keys(&self) -> Result<Vec<String>, StoreError>;
}

/// In-process store with an optional byte quota over keys and values.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: DashMap<String, String>,
    used: AtomicUsize,
    quota: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that rejects writes pushing usage past `bytes`.
    pub fn with_quota(bytes: usize) -> Self {
        Self {
            quota: Some(bytes),
            ..Self::default()
        }
    }

    pub fn used_bytes(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Swaps `old_size` for `new_size` in the usage total, unless that breaks the quota.
    fn reserve(&self, old_size: usize, new_size: usize) -> Result<(), StoreError> {
        let mut used = self.used.load(Ordering::Acquire);
        loop {
            let projected = used.saturating_sub(old_size) + new_size;
            if self.quota.is_some_and(|quota| projected > quota) {
                return Err(StoreError::QuotaExceeded);
            }
            match self
                .used
                .compare_exchange_weak(used, projected, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Ok(()),
                Err(actual) => used = actual,
            }
        }
    }
}

impl RawStore for MemoryStore {
    fn raw_get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.data.get(key).map(|v| v.value().clone()))
    }

    fn raw_set(&self, key: &str, value: String) -> Result<(), StoreError> {
        let new_size = key.len() + value.len();
        // The entry holds the shard lock until the write lands, so the old
        // size cannot change underneath the reservation.
        match self.data.entry(key.to_string()) {
            Entry::Occupied(mut e) => {
                self.reserve(key.len() + e.get().len(), new_size)?;
                e.insert(value);
            }
            Entry::Vacant(e) => {
                self.reserve(0, new_size)?;
                e.insert(value);
            }
        }
        Ok(())
    }

    fn raw_delete(&self, key: &str) -> Result<(), StoreError> {
        // Bytes are released while the shard is still locked.
        self.data.remove_if(key, |k, v| {
            let size = k.len() + v.len();
            let _ = self
                .used
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                    Some(used.saturating_sub(size))
                });
            true
        });
        Ok(())
    }

    fn raw_keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.data.iter().map(|e| e.key().clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_roundtrip_and_accounting() {
        let store = MemoryStore::new();
        store.raw_set("a", "123".into()).unwrap();
        assert_eq!(store.raw_get("a").unwrap().as_deref(), Some("123"));
        assert_eq!(store.used_bytes(), 4);

        store.raw_set("a", "1".into()).unwrap();
        assert_eq!(store.used_bytes(), 2);

        store.raw_delete("a").unwrap();
        assert_eq!(store.raw_get("a").unwrap(), None);
        assert_eq!(store.used_bytes(), 0);
        assert!(store.is_empty());
    }

    #[test]
    fn test_memory_store_quota() {
        let store = MemoryStore::with_quota(10);
        store.raw_set("k", "12345".into()).unwrap();
        assert_eq!(
            store.raw_set("j", "123456".into()),
            Err(StoreError::QuotaExceeded)
        );
        // Overwrite within quota accounts for the replaced value.
        store.raw_set("k", "123456789".into()).unwrap();
        assert_eq!(store.used_bytes(), 10);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_memory_store_quota_holds_under_concurrent_writes() {
        let store = MemoryStore::with_quota(100);
        std::thread::scope(|scope| {
            for t in 0..8 {
                let store = &store;
                scope.spawn(move || {
                    for i in 0..200 {
                        let key = format!("k{}-{}", t, i % 5);
                        let _ = store.raw_set(&key, "v".repeat(i % 7));
                        assert!(store.used_bytes() <= 100);
                        if i % 3 == 0 {
                            store.raw_delete(&key).unwrap();
                        }
                    }
                });
            }
        });

        let stored: usize = store
            .raw_keys()
            .unwrap()
            .iter()
            .map(|k| k.len() + store.raw_get(k).unwrap().map_or(0, |v| v.len()))
            .sum();
        assert!(store.used_bytes() <= 100);
        assert_eq!(store.used_bytes(), stored);
    }
}
