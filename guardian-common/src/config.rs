use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NodeConfig {
    pub api: ApiConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TimeoutConfig {
    /// Bound on the guardian set source RPC call.
    #[serde(default = "default_fetch_secs")]
    pub guardian_set_fetch_secs: u64,
    /// Per-subscriber delivery budget before teardown.
    #[serde(default = "default_delivery_secs")]
    pub delivery_secs: u64,
    /// Heartbeats older than this are purged by the periodic sweep.
    #[serde(default = "default_heartbeat_max_age_secs")]
    pub heartbeat_max_age_secs: u64,
    /// Cadence of the pending message release poll.
    #[serde(default = "default_release_poll_millis")]
    pub release_poll_millis: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_fetch_secs() -> u64 {
    5
}

fn default_delivery_secs() -> u64 {
    5
}

fn default_heartbeat_max_age_secs() -> u64 {
    60
}

fn default_release_poll_millis() -> u64 {
    100
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            guardian_set_fetch_secs: default_fetch_secs(),
            delivery_secs: default_delivery_secs(),
            heartbeat_max_age_secs: default_heartbeat_max_age_secs(),
            release_poll_millis: default_release_poll_millis(),
        }
    }
}

impl TimeoutConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.guardian_set_fetch_secs)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_secs)
    }

    pub fn heartbeat_max_age(&self) -> Duration {
        Duration::from_secs(self.heartbeat_max_age_secs)
    }

    pub fn release_poll_interval(&self) -> Duration {
        Duration::from_millis(self.release_poll_millis)
    }
}

impl NodeConfig {
    pub fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: NodeConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn default_test_config() -> Self {
        Self {
            api: ApiConfig {
                host: "127.0.0.1".to_string(),
                port: 7073,
            },
            timeouts: TimeoutConfig::default(),
            log_level: "info".to_string(),
        }
    }
}
