// Main entrypoint: drives concurrent coalesced requests through the pool and cache.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use flightcache::cache::sweeper;
use flightcache::config::{Config, ConfigTrait};
use flightcache::dedlog;
use flightcache::shutdown::GracefulShutdown;
use flightcache::{Cache, DurableCacheAdapter, MemoryStore, RequestCoordinator, ResultCache, WorkerPool};

const CONFIG_PATH: &str = "cfg/flightcache.cfg.yaml";
const CONFIG_PATH_LOCAL: &str = "cfg/flightcache.cfg.local.yaml";

/// flightcache - single-flight result cache over an isolated worker pool
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Custom config file path
    #[arg(short, long, value_name = "FILE")]
    cfg: Option<PathBuf>,

    /// Number of distinct keys requests are spread over
    #[arg(long, default_value_t = 8)]
    keys: usize,

    /// Total number of concurrent requests
    #[arg(long, default_value_t = 200)]
    requests: usize,

    /// Simulated computation time per producer run, in milliseconds
    #[arg(long, default_value_t = 50)]
    work_ms: u64,
}

/// Loads the configuration struct from YAML file.
/// Tries local config first, then falls back to default config.
fn load_cfg(path: Option<PathBuf>) -> Result<Config> {
    if let Some(custom_path) = path {
        let cfg = Config::load(&custom_path)
            .with_context(|| format!("failed to load custom config from {:?}", custom_path))?;
        info!(component = "config", event = "load_success", path = ?custom_path, "config loaded");
        return Ok(cfg);
    }

    match Config::load(PathBuf::from(CONFIG_PATH_LOCAL)) {
        Ok(cfg) => {
            info!(component = "config", event = "load_success", path = CONFIG_PATH_LOCAL, "config loaded");
            Ok(cfg)
        }
        Err(_) => {
            let cfg = Config::load(PathBuf::from(CONFIG_PATH))
                .with_context(|| format!("failed to load config from {}", CONFIG_PATH))?;
            info!(component = "config", event = "load_success", path = CONFIG_PATH, "config loaded");
            Ok(cfg)
        }
    }
}

/// Configures structured logging based on configuration.
fn configure_logger(cfg: &Config) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let log_level = cfg
        .logs()
        .and_then(|logs| logs.level.as_deref())
        .unwrap_or("info");

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    if cfg.is_prod() {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().pretty())
            .init();
    }
}

/// Builds the configured cache: durable over an in-process store, or in-memory
/// with an optional sweeper.
fn build_cache(cfg: &Config, graceful: &GracefulShutdown) -> Arc<dyn Cache<String>> {
    if let Some(durable) = cfg.durable().filter(|d| d.enabled) {
        let store = match durable.quota_bytes {
            Some(quota) => MemoryStore::with_quota(quota),
            None => MemoryStore::new(),
        };
        let adapter = DurableCacheAdapter::from_config(cfg, Arc::new(store));
        info!(
            component = "main",
            event = "cache_ready",
            kind = "durable",
            namespace = adapter.namespace(),
            "durable cache configured"
        );
        return Arc::new(adapter);
    }

    let cache = Arc::new(ResultCache::<String>::from_config(cfg));
    if let Some(every) = cfg.cache().and_then(|c| c.sweep_interval) {
        graceful.spawn(sweeper::run(graceful.token(), cache.clone(), every));
    }
    info!(
        component = "main",
        event = "cache_ready",
        kind = "memory",
        ttl = ?cache.ttl(),
        max_entries = cache.max_entries(),
        "in-memory cache configured"
    );
    cache
}

/// Fires `requests` concurrent fetches over `keys` keys and waits for all of them.
async fn drive_load(
    coordinator: Arc<RequestCoordinator<String>>,
    token: CancellationToken,
    keys: usize,
    requests: usize,
    work: Duration,
) {
    let started = Instant::now();
    let mut set = JoinSet::new();
    for i in 0..requests {
        let coordinator = coordinator.clone();
        let key = format!("report-{}", i % keys.max(1));
        set.spawn(async move {
            let produced_for = key.clone();
            coordinator
                .fetch_on_pool(&key, move || {
                    std::thread::sleep(work);
                    Ok(format!("{} computed at {}", produced_for, chrono::Utc::now().to_rfc3339()))
                })
                .await
        });
    }

    let (mut ok, mut failed) = (0u64, 0u64);
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                set.abort_all();
                warn!(component = "main", event = "load_cancelled", ok, failed, "load interrupted");
                return;
            }
            joined = set.join_next() => {
                match joined {
                    None => break,
                    Some(Ok(Ok(_))) => ok += 1,
                    Some(Ok(Err(e))) => {
                        failed += 1;
                        warn!(component = "main", event = "request_failed", error = %e, "request failed");
                    }
                    Some(Err(e)) => {
                        failed += 1;
                        error!(component = "main", event = "request_panicked", error = %e, "request task failed");
                    }
                }
            }
        }
    }

    info!(
        component = "main",
        event = "load_finished",
        requests,
        keys,
        ok,
        failed,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "load finished"
    );
}

fn main() -> Result<()> {
    let args = Args::parse();

    tokio::runtime::Runtime::new()
        .context("Failed to create tokio runtime")?
        .block_on(async_main(args))
}

async fn async_main(args: Args) -> Result<()> {
    let shutdown_token = CancellationToken::new();

    let cfg = load_cfg(args.cfg.clone())?;
    configure_logger(&cfg);

    let graceful = GracefulShutdown::new(shutdown_token.clone());
    graceful.spawn(dedlog::start_dedup_logger(shutdown_token.clone()));

    let pool: WorkerPool<String> = WorkerPool::from_config(&cfg)?;
    let cache = build_cache(&cfg, &graceful);
    let coordinator = Arc::new(RequestCoordinator::new(cache.clone()).with_pool(pool.clone()));

    info!(
        component = "main",
        event = "started",
        pool = pool.name(),
        pool_size = pool.stats().pool_size,
        requests = args.requests,
        keys = args.keys,
        work_ms = args.work_ms,
        "flightcache started"
    );

    let load_token = shutdown_token.clone();
    let load_coordinator = coordinator.clone();
    graceful.spawn(async move {
        drive_load(
            load_coordinator,
            load_token.clone(),
            args.keys,
            args.requests,
            Duration::from_millis(args.work_ms),
        )
        .await;
        load_token.cancel();
    });

    let shutdown_res = graceful.await_shutdown().await;
    pool.shutdown();

    let flights = coordinator.stats();
    let pool_stats = pool.stats();
    let cache_stats = cache.stats();
    info!(
        component = "main",
        event = "final_stats",
        producer_runs = flights.producer_runs,
        coalesced = flights.coalesced,
        hits = flights.hits,
        stale_hits = flights.stale_hits,
        completed = pool_stats.completed,
        failed = pool_stats.failed,
        faulted = pool_stats.faulted,
        rejected = pool_stats.rejected,
        cache_entries = cache_stats.entries,
        cache_usage = %flightcache::bytes::fmt_mem(cache_stats.bytes as i64),
        cache_degraded = cache_stats.degraded,
        "final statistics"
    );

    if let Err(e) = shutdown_res {
        error!(
            component = "main",
            scope = "service",
            event = "graceful_shutdown_failed",
            error = %e,
            "failed to gracefully shut down service"
        );
        return Err(e);
    }

    Ok(())
}
