// Configuration loading and management.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::cache::ReadMode;

pub const PROD: &str = "prod";
#[allow(dead_code)]
pub const DEV: &str = "dev";
pub const TEST: &str = "test";

pub const DEFAULT_POOL_NAME: &str = "flight";
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);
pub const DEFAULT_MAX_ENTRIES: usize = 1000;
pub const DEFAULT_STATS_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_NAMESPACE: &str = "flightcache";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FlightCache {
    #[serde(rename = "flightcache")]
    pub root: ConfigBox,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConfigBox {
    pub env: String,
    pub logs: Option<Logs>,
    pub pool: Option<Pool>,
    pub cache: Option<Cache>,
    pub durable: Option<Durable>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Logs {
    pub level: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Pool {
    pub name: Option<String>,
    /// Number of workers; 0 means one per available core.
    #[serde(default)]
    pub size: usize,
    #[serde(rename = "stats_interval", default, with = "humantime_serde")]
    pub stats_interval: Option<Duration>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Cache {
    #[serde(default, with = "humantime_serde")]
    pub ttl: Option<Duration>,
    #[serde(rename = "max_entries")]
    pub max_entries: Option<usize>,
    pub mode: Option<ReadMode>,
    #[serde(rename = "sweep_interval", default, with = "humantime_serde")]
    pub sweep_interval: Option<Duration>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Durable {
    pub enabled: bool,
    pub namespace: Option<String>,
    #[serde(default, with = "humantime_serde")]
    pub ttl: Option<Duration>,
    #[serde(rename = "max_entries")]
    pub max_entries: Option<usize>,
    #[serde(rename = "quota_bytes")]
    pub quota_bytes: Option<usize>,
}

// Config trait
pub trait ConfigTrait {
    fn logs(&self) -> Option<&Logs>;
    fn is_prod(&self) -> bool;
    #[allow(dead_code)]
    fn is_test(&self) -> bool;
    fn pool(&self) -> Option<&Pool>;
    fn cache(&self) -> Option<&Cache>;
    fn durable(&self) -> Option<&Durable>;

    /// Effective worker count.
    fn pool_size(&self) -> usize;
    fn pool_name(&self) -> String;
    fn stats_interval(&self) -> Duration;
    fn cache_ttl(&self) -> Duration;
    fn cache_max_entries(&self) -> usize;
    fn cache_mode(&self) -> ReadMode;
}

// Config type alias for convenience
pub type Config = FlightCache;

impl ConfigTrait for Config {
    fn logs(&self) -> Option<&Logs> {
        self.root.logs.as_ref()
    }

    fn is_prod(&self) -> bool {
        self.root.env == PROD
    }

    fn is_test(&self) -> bool {
        self.root.env == TEST
    }

    fn pool(&self) -> Option<&Pool> {
        self.root.pool.as_ref()
    }

    fn cache(&self) -> Option<&Cache> {
        self.root.cache.as_ref()
    }

    fn durable(&self) -> Option<&Durable> {
        self.root.durable.as_ref()
    }

    fn pool_size(&self) -> usize {
        match self.pool().map(|p| p.size).unwrap_or(0) {
            0 => num_cpus::get(),
            n => n,
        }
    }

    fn pool_name(&self) -> String {
        self.pool()
            .and_then(|p| p.name.clone())
            .unwrap_or_else(|| DEFAULT_POOL_NAME.to_string())
    }

    fn stats_interval(&self) -> Duration {
        self.pool()
            .and_then(|p| p.stats_interval)
            .unwrap_or(DEFAULT_STATS_INTERVAL)
    }

    fn cache_ttl(&self) -> Duration {
        self.cache().and_then(|c| c.ttl).unwrap_or(DEFAULT_TTL)
    }

    fn cache_max_entries(&self) -> usize {
        self.cache()
            .and_then(|c| c.max_entries)
            .unwrap_or(DEFAULT_MAX_ENTRIES)
    }

    fn cache_mode(&self) -> ReadMode {
        self.cache().and_then(|c| c.mode).unwrap_or_default()
    }
}

impl Config {
    /// Loads configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let abs_path = path
            .canonicalize()
            .with_context(|| format!("failed to resolve absolute config filepath: {:?}", path))?;

        let data = std::fs::read_to_string(&abs_path)
            .with_context(|| format!("read config yaml file {:?}", abs_path))?;

        Self::from_yaml(&data).with_context(|| format!("load config from {:?}", abs_path))
    }

    /// Parses and validates configuration from a YAML string.
    pub fn from_yaml(data: &str) -> Result<Self> {
        let cfg: FlightCache = serde_yaml::from_str(data).context("unmarshal yaml")?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if let Some(pool) = self.pool() {
            if pool.stats_interval.is_some_and(|every| every.is_zero()) {
                anyhow::bail!("pool.stats_interval must be greater than zero");
            }
        }
        if let Some(cache) = self.cache() {
            if cache.sweep_interval.is_some_and(|every| every.is_zero()) {
                anyhow::bail!("cache.sweep_interval must be greater than zero");
            }
            if cache.max_entries == Some(0) {
                anyhow::bail!("cache.max_entries must be greater than zero");
            }
            if cache.ttl.is_some_and(|ttl| ttl.is_zero()) {
                anyhow::bail!("cache.ttl must be greater than zero");
            }
        }
        if let Some(durable) = self.durable() {
            if durable.max_entries == Some(0) {
                anyhow::bail!("durable.max_entries must be greater than zero");
            }
            if durable.ttl.is_some_and(|ttl| ttl.is_zero()) {
                anyhow::bail!("durable.ttl must be greater than zero");
            }
        }
        Ok(())
    }
}

// Test config is always available for integration tests
mod test_config;
#[allow(dead_code)]
pub use test_config::new_test_config;
