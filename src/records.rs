//! Record types for indexed chain data
//!
//! These structs represent the rows stored in the chain store.
//! They use postcard for binary serialization, which is compact and deterministic.

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

/// Block row, keyed by block number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    /// Block number
    pub number: u64,
    /// Block hash
    pub hash: B256,
    /// Timestamp at which the block was mined (Unix epoch seconds)
    pub timestamp: u64,
    /// Number of transactions the node reports for this block
    pub tx_count: u64,
}

/// Transaction row, keyed by transaction hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRecord {
    /// Transaction hash
    pub hash: B256,
    /// Number of the block that includes this transaction
    pub block_number: u64,
    /// Recovered sender
    pub from: Address,
    /// Recipient; `None` marks a contract creation
    pub to: Option<Address>,
    /// Value transferred in wei
    pub amount: U256,
    /// Sender nonce
    pub nonce: u64,
    /// Same as the including block's timestamp
    pub timestamp: u64,
    /// Zero-based position within the block.
    ///
    /// The store does not preserve insertion sequence, so this is the only
    /// authoritative intra-block ordering.
    pub order: u32,
}

/// A block row together with the hashes of its persisted transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockView {
    #[serde(flatten)]
    pub block: BlockRecord,
    /// Transaction hashes sorted by `order`
    pub txs: Vec<B256>,
}

/// Aggregate over all persisted transactions in a block range.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RangeStats {
    pub txs: Vec<B256>,
    pub total_amount: U256,
}
