//! CLI implementation for chainctl
//!
//! Read-only queries over the indexed chain store. All commands output
//! pretty JSON.

use crate::records::{BlockView, TxRecord};
use crate::store::{ChainReader, RocksChainStore};
use alloy_primitives::B256;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;

/// Chain store query tool
#[derive(Parser)]
#[command(name = "chainctl")]
#[command(about = "Query blocks and transactions indexed by the chainscan indexer")]
pub struct Cli {
    /// Path to the RocksDB database directory
    #[arg(short, long, default_value = "./chain_db")]
    db_path: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the highest indexed block
    LatestBlock,
    /// Show a block by number
    Block {
        /// Block number
        number: u64,
    },
    /// Show the last transaction of the highest indexed block
    LatestTx,
    /// Show a transaction by hash
    Tx {
        /// Transaction hash in hex (64 hex chars, with or without 0x prefix)
        hash: String,
    },
    /// List transactions and their total amount over a block range
    Stats {
        /// First block (inclusive)
        start: u64,
        /// Last block (inclusive)
        end: u64,
    },
    /// Check that the store can be read
    Health,
}

/// Pad an odd-length hex string with a leading zero.
fn pad_hex_string(s: &str) -> String {
    if s.len() % 2 == 1 {
        format!("0{}", s)
    } else {
        s.to_string()
    }
}

/// Parse a hex string into a 32-byte hash (B256).
fn parse_hash(s: &str) -> Result<B256> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let s = pad_hex_string(s);
    let bytes = hex::decode(&s).with_context(|| format!("Invalid hex hash: {}", s))?;
    if bytes.len() != 32 {
        anyhow::bail!("Hash must be 32 bytes (64 hex chars), got {} bytes", bytes.len());
    }
    Ok(B256::from_slice(&bytes))
}

fn block_json(view: &BlockView) -> Value {
    json!({
        "number": view.block.number,
        "hash": format!("0x{:x}", view.block.hash),
        "timestamp": view.block.timestamp,
        "tx_count": view.block.tx_count,
        "txs": view.txs.iter().map(|h| format!("0x{:x}", h)).collect::<Vec<_>>(),
    })
}

fn tx_json(tx: &TxRecord) -> Value {
    json!({
        "hash": format!("0x{:x}", tx.hash),
        "block_number": tx.block_number,
        "from": format!("0x{:x}", tx.from),
        "to": tx.to.map(|to| format!("0x{:x}", to)),
        "amount": format!("0x{:x}", tx.amount),
        "nonce": tx.nonce,
        "timestamp": tx.timestamp,
        "order": tx.order,
    })
}

/// Execute one query against the store.
pub fn execute(store: &dyn ChainReader, command: Commands) -> Result<Value> {
    let result = match command {
        Commands::LatestBlock => match store.latest_block()? {
            Some(view) => json!({ "block": block_json(&view) }),
            None => json!({ "block": null }),
        },
        Commands::Block { number } => match store.block(number)? {
            Some(view) => json!({ "block": block_json(&view) }),
            None => json!({ "number": number, "block": null }),
        },
        Commands::LatestTx => match store.latest_tx()? {
            Some(tx) => json!({ "tx": tx_json(&tx) }),
            None => json!({ "tx": null }),
        },
        Commands::Tx { hash } => {
            let hash = parse_hash(&hash)?;
            match store.tx(hash)? {
                Some(tx) => json!({ "tx": tx_json(&tx) }),
                None => json!({ "hash": format!("0x{:x}", hash), "tx": null }),
            }
        }
        Commands::Stats { start, end } => {
            if start > end {
                anyhow::bail!("Range start {} is past range end {}", start, end);
            }
            let stats = store.range_stats(start, end)?;
            json!({
                "start": start,
                "end": end,
                "tx_count": stats.txs.len(),
                "total_amount": format!("0x{:x}", stats.total_amount),
                "txs": stats.txs.iter().map(|h| format!("0x{:x}", h)).collect::<Vec<_>>(),
            })
        }
        Commands::Health => {
            store.ping()?;
            json!({ "version": env!("CARGO_PKG_VERSION"), "store": "ok" })
        }
    };
    Ok(result)
}

/// Run the CLI command and print JSON output.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let store = RocksChainStore::open_read_only(&cli.db_path)
        .with_context(|| format!("Failed to open database at {:?}", cli.db_path))?;

    let result = execute(&store, cli.command)?;

    // Pretty print JSON
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
