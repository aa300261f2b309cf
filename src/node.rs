//! Remote node contract
//!
//! The ingestion engine only talks to the chain through [`RemoteNode`].
//! [`crate::rpc::RpcClient`] is the JSON-RPC implementation; tests use a
//! scripted in-memory node.

use crate::types::{Block, Header, Transaction};
use alloy_primitives::{Address, B256};
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Chain context needed to recover transaction senders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignerContext {
    pub chain_id: u64,
}

/// A live `newHeads` feed.
///
/// `heads` yields notifications in feed order. `errors` is the side channel
/// for subscription-level failures, including the transport closing. Dropping
/// the subscription stops the underlying reader; [`HeadSubscription::close`]
/// also waits for it to exit.
#[derive(Debug)]
pub struct HeadSubscription {
    pub heads: mpsc::Receiver<Header>,
    pub errors: mpsc::Receiver<anyhow::Error>,
    stop: CancellationToken,
    reader: Option<JoinHandle<()>>,
}

impl HeadSubscription {
    /// `reader` must exit once `stop` is cancelled.
    pub fn new(
        heads: mpsc::Receiver<Header>,
        errors: mpsc::Receiver<anyhow::Error>,
        stop: CancellationToken,
        reader: JoinHandle<()>,
    ) -> Self {
        Self {
            heads,
            errors,
            stop,
            reader: Some(reader),
        }
    }

    /// Stop the reader and wait for it to finish.
    pub async fn close(mut self) {
        self.stop.cancel();
        if let Some(reader) = self.reader.take() {
            if let Err(e) = reader.await {
                warn!("Subscription reader failed: {}", e);
            }
        }
    }
}

impl Drop for HeadSubscription {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

/// Capabilities the ingestion engine needs from a remote chain node.
#[async_trait]
pub trait RemoteNode: Send + Sync {
    /// Number of the current chain head.
    async fn latest_block_number(&self) -> Result<u64>;

    /// Block with full transaction objects.
    async fn block_by_number(&self, number: u64) -> Result<Block>;

    /// Transaction count of the block with the given hash.
    async fn transaction_count(&self, block_hash: B256) -> Result<u64>;

    /// Chain context used by [`RemoteNode::recover_sender`].
    async fn signer_context(&self) -> Result<SignerContext>;

    /// Recover the sender of a transaction under the given signer context.
    fn recover_sender(&self, ctx: &SignerContext, tx: &Transaction) -> Result<Address>;

    /// Open a subscription to new-head notifications.
    ///
    /// `capacity` bounds the buffer of undelivered notifications.
    async fn subscribe_new_heads(&self, capacity: usize) -> Result<HeadSubscription>;
}
