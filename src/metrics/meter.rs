// Metric name constants
pub const CACHE_HITS: &str = "cache_hits";
pub const CACHE_MISSES: &str = "cache_misses";
pub const CACHE_LENGTH: &str = "cache_length";
pub const CACHE_MEMORY_USAGE: &str = "cache_memory_usage";
pub const CACHE_EXPIRED: &str = "cache_expired_items";

pub const POOL_SIZE: &str = "pool_size";
pub const POOL_ACTIVE_WORKERS: &str = "pool_active_workers";
pub const POOL_BUSY_WORKERS: &str = "pool_busy_workers";
pub const POOL_QUEUED_TASKS: &str = "pool_queued_tasks";
pub const POOL_COMPLETED: &str = "pool_completed_total";
pub const POOL_FAILED: &str = "pool_failed_total";
pub const POOL_FAULTED: &str = "pool_faulted_total";

pub const FLIGHT_PRODUCER_RUNS: &str = "flight_producer_runs";
pub const FLIGHT_COALESCED: &str = "flight_coalesced";

pub const DURABLE_WRITE_FAILURES: &str = "durable_write_failures";
pub const DURABLE_CORRUPT: &str = "durable_corrupt_entries";

/// Adds cache hits.
pub fn add_cache_hits(value: u64) {
    ::metrics::counter!(CACHE_HITS).increment(value);
}

/// Adds cache misses.
pub fn add_cache_misses(value: u64) {
    ::metrics::counter!(CACHE_MISSES).increment(value);
}

/// Adds entries removed by the expiry sweeper.
pub fn add_cache_expired(value: u64) {
    ::metrics::counter!(CACHE_EXPIRED).increment(value);
}

/// Sets cache length and diagnostic memory usage.
pub fn set_cache_usage(entries: usize, bytes: usize) {
    ::metrics::gauge!(CACHE_LENGTH).set(entries as f64);
    ::metrics::gauge!(CACHE_MEMORY_USAGE).set(bytes as f64);
}

/// Sets pool gauges.
pub fn set_pool_gauges(size: usize, active: usize, busy: usize, queued: usize) {
    ::metrics::gauge!(POOL_SIZE).set(size as f64);
    ::metrics::gauge!(POOL_ACTIVE_WORKERS).set(active as f64);
    ::metrics::gauge!(POOL_BUSY_WORKERS).set(busy as f64);
    ::metrics::gauge!(POOL_QUEUED_TASKS).set(queued as f64);
}

/// Adds task outcome counters.
pub fn add_pool_outcomes(completed: u64, failed: u64, faulted: u64) {
    ::metrics::counter!(POOL_COMPLETED).increment(completed);
    ::metrics::counter!(POOL_FAILED).increment(failed);
    ::metrics::counter!(POOL_FAULTED).increment(faulted);
}

/// Adds a producer run.
pub fn add_producer_run() {
    ::metrics::counter!(FLIGHT_PRODUCER_RUNS).increment(1);
}

/// Adds a caller that joined an existing flight.
pub fn add_coalesced() {
    ::metrics::counter!(FLIGHT_COALESCED).increment(1);
}

/// Adds a dropped durable write.
pub fn add_durable_write_failure() {
    ::metrics::counter!(DURABLE_WRITE_FAILURES).increment(1);
}

/// Adds a corrupt durable entry.
pub fn add_durable_corrupt() {
    ::metrics::counter!(DURABLE_CORRUPT).increment(1);
}
