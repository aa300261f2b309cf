//! Chain indexer binary
//!
//! Scans the requested block ranges into the local store, then keeps
//! following the chain head until interrupted.

use anyhow::{Context, Result};
use chainscan::rpc::RpcClient;
use chainscan::store::RocksChainStore;
use chainscan::{Indexer, IndexerConfig};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Blockchain indexer
#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Index Ethereum blocks and transactions into a local store")]
struct Args {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// RPC endpoint URL (overrides node.endpoint)
    #[arg(short, long)]
    rpc_url: Option<String>,

    /// WebSocket endpoint URL (overrides node.ws_endpoint)
    #[arg(long)]
    ws_url: Option<String>,

    /// Path to RocksDB database directory (overrides store.path)
    #[arg(short, long)]
    db_path: Option<PathBuf>,

    /// Number of scan workers (overrides indexer.workers)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Block range to scan at startup: "start:end", "start" or "" (repeatable)
    #[arg(short, long)]
    scan: Vec<String>,
}

impl Args {
    fn into_config(self) -> Result<(IndexerConfig, Vec<String>)> {
        let mut config = match &self.config {
            Some(path) => IndexerConfig::load(path)?,
            None => IndexerConfig::default(),
        };
        if let Some(url) = self.rpc_url {
            config.node.endpoint = url;
        }
        if let Some(url) = self.ws_url {
            config.node.ws_endpoint = Some(url);
        }
        if let Some(path) = self.db_path {
            config.store.path = path;
        }
        if let Some(workers) = self.workers {
            config.indexer.workers = workers;
        }
        config.validate()?;
        Ok((config, self.scan))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let (config, ranges) = Args::parse().into_config()?;

    info!("Starting chain indexer");
    info!("RPC URL: {}", config.node.endpoint);
    info!("Database: {:?}", config.store.path);

    let store = RocksChainStore::open(&config.store.path)
        .with_context(|| format!("Failed to open database at {:?}", config.store.path))?;
    let rpc = RpcClient::new(config.node.endpoint.clone(), config.node.ws_endpoint.clone())?;

    let indexer = Indexer::start(&config, Arc::new(rpc), Arc::new(store))
        .await
        .context("Failed to start indexer")?;

    let health = serde_json::to_string(&indexer.health()).context("Failed to encode health")?;
    info!("Indexer health: {}", health);

    let handle = indexer.handle();
    for range in &ranges {
        if let Err(e) = handle.scan(range) {
            error!("Rejected scan range {:?}: {:#}", range, e);
        }
    }

    indexer.run_until_signal().await?;
    info!("Indexer stopped");
    Ok(())
}
