//! Indexer configuration
//!
//! Loaded from a TOML file. Every section and key is optional; missing values
//! fall back to the defaults below. Durations are written as `"10s"`,
//! `"500ms"` and so on.
//!
//! ```toml
//! [node]
//! endpoint = "http://127.0.0.1:8545"
//!
//! [indexer]
//! workers = 4
//! timeout = "10s"
//!
//! [limiter]
//! rate = 10
//! interval = "1s"
//!
//! [store]
//! path = "./chain_db"
//! ```

use crate::queue::DEFAULT_QUEUE_CAPACITY;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IndexerConfig {
    pub node: NodeConfig,
    pub indexer: EngineConfig,
    pub limiter: LimiterConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeConfig {
    /// HTTP JSON-RPC endpoint
    pub endpoint: String,
    /// WebSocket endpoint for `newHeads`; derived from `endpoint` when unset
    pub ws_endpoint: Option<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8545".to_string(),
            ws_endpoint: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub workers: usize,
    /// Upper bound on fetching and storing one block
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub queue_capacity: usize,
    /// Buffered `newHeads` notifications
    pub events_capacity: usize,
    /// Largest number of ids a single range request may enqueue
    pub max_range: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            timeout: Duration::from_secs(10),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            events_capacity: 16,
            max_range: 1_000_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimiterConfig {
    /// Permits per interval
    pub rate: usize,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            rate: 10,
            interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./chain_db"),
        }
    }
}

impl IndexerConfig {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Invalid config file: {:?}", path))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.node.endpoint.starts_with("http://") && !self.node.endpoint.starts_with("https://")
        {
            anyhow::bail!(
                "node.endpoint must be an http:// or https:// URL, got {}",
                self.node.endpoint
            );
        }
        if let Some(ws) = &self.node.ws_endpoint {
            if !ws.starts_with("ws://") && !ws.starts_with("wss://") {
                anyhow::bail!("node.ws_endpoint must be a ws:// or wss:// URL, got {}", ws);
            }
        }

        let engine = &self.indexer;
        if engine.workers == 0 {
            anyhow::bail!("indexer.workers must be at least 1");
        }
        if engine.timeout.is_zero() {
            anyhow::bail!("indexer.timeout must be greater than zero");
        }
        if engine.queue_capacity == 0 {
            anyhow::bail!("indexer.queue_capacity must be at least 1");
        }
        if engine.events_capacity == 0 {
            anyhow::bail!("indexer.events_capacity must be at least 1");
        }
        if engine.max_range == 0 {
            anyhow::bail!("indexer.max_range must be at least 1");
        }

        if self.limiter.rate == 0 {
            anyhow::bail!("limiter.rate must be at least 1");
        }
        if self.limiter.interval.is_zero() {
            anyhow::bail!("limiter.interval must be greater than zero");
        }
        Ok(())
    }
}
