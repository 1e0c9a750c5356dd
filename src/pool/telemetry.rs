// Package pool provides telemetry for the worker pool.

use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::metrics;

use super::pool::PoolStats;

/// Logs pool statistics every `every` until the pool terminates.
pub async fn run<F>(token: CancellationToken, name: String, every: Duration, stats: F)
where
    F: Fn() -> Option<PoolStats> + Send + 'static,
{
    if every.is_zero() {
        tracing::warn!(name = %name, component = "pool", "zero stats interval, telemetry disabled");
        return;
    }
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // Skip the first immediate tick
    interval.tick().await;

    let mut prev = PoolStats::default();
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                return;
            }
            _ = interval.tick() => {
                let Some(cur) = stats() else {
                    return;
                };
                log_stats(&name, &prev, &cur);
                prev = cur;
            }
        }
    }
}

/// Logs pool statistics and updates metrics.
pub fn log_stats(name: &str, prev: &PoolStats, cur: &PoolStats) {
    let completed = cur.completed.saturating_sub(prev.completed);
    let failed = cur.failed.saturating_sub(prev.failed);
    let faulted = cur.faulted.saturating_sub(prev.faulted);

    metrics::set_pool_gauges(
        cur.pool_size,
        cur.active_workers,
        cur.busy_workers,
        cur.queued_tasks,
    );
    metrics::add_pool_outcomes(completed, failed, faulted);

    tracing::info!(
        name = %name,
        component = "pool",
        pool_size = cur.pool_size,
        active_workers = cur.active_workers,
        busy_workers = cur.busy_workers,
        queued_tasks = cur.queued_tasks,
        completed,
        failed,
        faulted,
        "pool statistics"
    );
}
