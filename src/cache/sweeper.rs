// Periodic expiry sweep and stats logging for the in-memory cache.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio::time::interval;
use tracing::{info, warn};

use crate::bytes;
use crate::metrics;

use super::memory::ResultCache;
use super::{Cache, ReadMode};

/// Runs until `shutdown_token` is cancelled. Expired entries are only purged in
/// evict mode; stale-while-revalidate keeps them for the next refresh.
pub async fn run<V>(shutdown_token: CancellationToken, cache: Arc<ResultCache<V>>, every: Duration)
where
    V: Clone + Send + Sync + 'static,
{
    if every.is_zero() {
        warn!(component = "cache", event = "sweeper_disabled", "zero sweep interval, sweeper disabled");
        return;
    }
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // Skip the first immediate tick
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown_token.cancelled() => {
                return;
            }
            _ = ticker.tick() => {
                let purged = if cache.read_mode() == ReadMode::Evict {
                    cache.purge_expired()
                } else {
                    0
                };
                metrics::add_cache_expired(purged as u64);

                let stats = cache.stats();
                metrics::set_cache_usage(stats.entries, stats.bytes);
                info!(
                    component = "cache",
                    event = "stats",
                    entries = stats.entries,
                    max_entries = cache.max_entries(),
                    usage = %bytes::fmt_mem(stats.bytes as i64),
                    hits = stats.hits,
                    stale_hits = stats.stale_hits,
                    misses = stats.misses,
                    evictions = stats.evictions,
                    expirations = stats.expirations,
                    purged,
                    "cache stats"
                );
            }
        }
    }
}
