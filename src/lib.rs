//! chainscan - blockchain ingestion engine
//!
//! Scans blocks and transactions from an Ethereum JSON-RPC node into a local
//! RocksDB store. Historical ranges are scanned by a rate-limited worker pool;
//! once catch-up reaches the chain head the indexer follows new heads over a
//! WebSocket subscription.

pub mod keys;
pub mod records;
pub mod store;
pub mod cli;

// Ingestion engine
pub mod config;
pub mod coordinator;
pub mod indexer;
pub mod limiter;
pub mod node;
pub mod queue;
pub mod range;
pub mod rpc;
pub mod types;
pub mod worker;
pub mod ws;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-export the main types for convenience
pub use config::IndexerConfig;
pub use indexer::{Indexer, IndexerHandle};
pub use node::RemoteNode;
pub use records::{BlockRecord, BlockView, RangeStats, TxRecord};
pub use store::{ChainReader, ChainWriter, RocksChainStore};
