use super::{Cache, Config, ConfigBox, Durable, Logs, Pool};
use crate::cache::ReadMode;
use std::time::Duration;

/// Creates a new test configuration.
pub fn new_test_config() -> Config {
    Config {
        root: ConfigBox {
            env: super::TEST.to_string(),
            logs: Some(Logs {
                level: Some("debug".to_string()),
            }),
            pool: Some(Pool {
                name: Some("test-pool".to_string()),
                size: 2,
                stats_interval: Some(Duration::from_secs(1)),
            }),
            cache: Some(Cache {
                ttl: Some(Duration::from_secs(60)),
                max_entries: Some(16),
                mode: Some(ReadMode::Evict),
                sweep_interval: None,
            }),
            durable: Some(Durable {
                enabled: false,
                namespace: Some("flightcache-test".to_string()),
                ttl: Some(Duration::from_secs(60)),
                max_entries: Some(16),
                quota_bytes: None,
            }),
        },
    }
}
