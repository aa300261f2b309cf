//! In-memory collaborators for engine tests.

use crate::node::{HeadSubscription, RemoteNode, SignerContext};
use crate::records::{BlockRecord, TxRecord};
use crate::store::ChainWriter;
use crate::types::{Block, Header, Transaction};
use alloy_primitives::{address, Address, B256, U256};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub const TEST_CHAIN_ID: u64 = 1;

pub fn block_hash(number: u64) -> B256 {
    let mut bytes = [0u8; 32];
    bytes[0] = 0xbb;
    bytes[24..].copy_from_slice(&number.to_be_bytes());
    B256::from(bytes)
}

pub fn tx_hash(number: u64, index: usize) -> B256 {
    let mut bytes = [0u8; 32];
    bytes[0] = 0xcc;
    bytes[16..24].copy_from_slice(&number.to_be_bytes());
    bytes[24..].copy_from_slice(&(index as u64).to_be_bytes());
    B256::from(bytes)
}

/// Deterministic block `number` with `tx_count` transactions.
///
/// Every third transaction is a contract creation.
pub fn make_block(number: u64, tx_count: usize) -> Block {
    let transactions = (0..tx_count)
        .map(|i| Transaction {
            hash: tx_hash(number, i),
            from: address!("0742d35cc6634c0532925a3b844bc9e7595f0beb"),
            to: if i % 3 == 2 {
                None
            } else {
                Some(address!("dac17f958d2ee523a2206206994597c13d831ec7"))
            },
            value: U256::from(1_000 + i as u64),
            nonce: i as u64,
            chain_id: Some(TEST_CHAIN_ID),
        })
        .collect();
    Block {
        number,
        hash: block_hash(number),
        timestamp: 1609459200 + number * 12,
        transactions,
    }
}

type LiveFeed = (mpsc::Sender<Header>, mpsc::Sender<anyhow::Error>);

/// Scripted [`RemoteNode`].
///
/// Serves generated blocks for any number and records every call.
pub struct MockNode {
    head: Mutex<u64>,
    txs_per_block: usize,
    overrides: Mutex<HashMap<u64, Block>>,
    failing_blocks: Mutex<HashSet<u64>>,
    bad_senders: Mutex<HashSet<B256>>,
    unreachable: AtomicBool,
    subscribe_fails: AtomicBool,
    subscribe_delay: Duration,
    block_fetches: Mutex<Vec<u64>>,
    subscriptions: AtomicUsize,
    live: Mutex<Option<LiveFeed>>,
    reader_stopped: Arc<AtomicBool>,
}

impl MockNode {
    pub fn new(head: u64) -> Self {
        Self {
            head: Mutex::new(head),
            txs_per_block: 3,
            overrides: Mutex::new(HashMap::new()),
            failing_blocks: Mutex::new(HashSet::new()),
            bad_senders: Mutex::new(HashSet::new()),
            unreachable: AtomicBool::new(false),
            subscribe_fails: AtomicBool::new(false),
            subscribe_delay: Duration::ZERO,
            block_fetches: Mutex::new(Vec::new()),
            subscriptions: AtomicUsize::new(0),
            live: Mutex::new(None),
            reader_stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_txs_per_block(mut self, count: usize) -> Self {
        self.txs_per_block = count;
        self
    }

    pub fn with_subscribe_delay(mut self, delay: Duration) -> Self {
        self.subscribe_delay = delay;
        self
    }

    pub fn set_block(&self, block: Block) {
        self.overrides.lock().unwrap().insert(block.number, block);
    }

    pub fn fail_block(&self, number: u64) {
        self.failing_blocks.lock().unwrap().insert(number);
    }

    pub fn fail_sender(&self, hash: B256) {
        self.bad_senders.lock().unwrap().insert(hash);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn set_subscribe_failure(&self, fails: bool) {
        self.subscribe_fails.store(fails, Ordering::SeqCst);
    }

    pub fn block_fetches(&self) -> Vec<u64> {
        self.block_fetches.lock().unwrap().clone()
    }

    /// Whether the reader of the latest subscription has exited.
    pub fn reader_stopped(&self) -> bool {
        self.reader_stopped.load(Ordering::SeqCst)
    }

    pub fn subscriptions_opened(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }

    /// Deliver a `newHeads` notification on the open subscription, if any.
    pub async fn push_head(&self, number: u64) {
        *self.head.lock().unwrap() = number;
        let sender = self.live.lock().unwrap().as_ref().map(|(heads, _)| heads.clone());
        if let Some(heads) = sender {
            let _ = heads
                .send(Header {
                    number,
                    hash: block_hash(number),
                })
                .await;
        }
    }

    /// Report an error on the open subscription's side channel.
    pub async fn fail_subscription(&self, message: &str) {
        let sender = self.live.lock().unwrap().as_ref().map(|(_, errors)| errors.clone());
        if let Some(errors) = sender {
            let _ = errors.send(anyhow::anyhow!(message.to_string())).await;
        }
    }

    fn check_reachable(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            anyhow::bail!("Connection refused");
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteNode for MockNode {
    async fn latest_block_number(&self) -> Result<u64> {
        self.check_reachable()?;
        Ok(*self.head.lock().unwrap())
    }

    async fn block_by_number(&self, number: u64) -> Result<Block> {
        self.check_reachable()?;
        self.block_fetches.lock().unwrap().push(number);
        if self.failing_blocks.lock().unwrap().contains(&number) {
            anyhow::bail!("Block {} not found", number);
        }
        if let Some(block) = self.overrides.lock().unwrap().get(&number) {
            return Ok(block.clone());
        }
        Ok(make_block(number, self.txs_per_block))
    }

    async fn transaction_count(&self, block_hash: B256) -> Result<u64> {
        self.check_reachable()?;
        let overridden = self
            .overrides
            .lock()
            .unwrap()
            .values()
            .find(|b| b.hash == block_hash)
            .map(|b| b.transactions.len());
        Ok(overridden.unwrap_or(self.txs_per_block) as u64)
    }

    async fn signer_context(&self) -> Result<SignerContext> {
        self.check_reachable()?;
        Ok(SignerContext {
            chain_id: TEST_CHAIN_ID,
        })
    }

    fn recover_sender(&self, ctx: &SignerContext, tx: &Transaction) -> Result<Address> {
        if self.bad_senders.lock().unwrap().contains(&tx.hash) {
            anyhow::bail!("Invalid signature for {:?}", tx.hash);
        }
        crate::rpc::recover_sender(ctx, tx)
    }

    async fn subscribe_new_heads(&self, capacity: usize) -> Result<HeadSubscription> {
        if !self.subscribe_delay.is_zero() {
            tokio::time::sleep(self.subscribe_delay).await;
        }
        if self.subscribe_fails.load(Ordering::SeqCst) {
            anyhow::bail!("Subscriptions not supported");
        }
        let (heads_tx, heads_rx) = mpsc::channel(capacity);
        let (errors_tx, errors_rx) = mpsc::channel(1);
        *self.live.lock().unwrap() = Some((heads_tx, errors_tx));
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        let stop = CancellationToken::new();
        let reader_stop = stop.clone();
        let stopped = self.reader_stopped.clone();
        stopped.store(false, Ordering::SeqCst);
        let reader = tokio::spawn(async move {
            reader_stop.cancelled().await;
            stopped.store(true, Ordering::SeqCst);
        });
        Ok(HeadSubscription::new(heads_rx, errors_rx, stop, reader))
    }
}

/// In-memory [`ChainWriter`] with the same duplicate rules as the RocksDB store.
#[derive(Default)]
pub struct MemoryStore {
    pre_scanned: Mutex<HashSet<u64>>,
    blocks: Mutex<BTreeMap<u64, BlockRecord>>,
    txs: Mutex<HashMap<B256, TxRecord>>,
    failing_txs: Mutex<HashSet<B256>>,
    unreachable: AtomicBool,
    block_saves: AtomicUsize,
    tx_saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `has_scanned` report true for `number` without storing a row.
    pub fn mark_scanned(&self, number: u64) {
        self.pre_scanned.lock().unwrap().insert(number);
    }

    pub fn fail_tx(&self, hash: B256) {
        self.failing_txs.lock().unwrap().insert(hash);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn block_saves(&self) -> usize {
        self.block_saves.load(Ordering::SeqCst)
    }

    pub fn tx_saves(&self) -> usize {
        self.tx_saves.load(Ordering::SeqCst)
    }

    pub fn block(&self, number: u64) -> Option<BlockRecord> {
        self.blocks.lock().unwrap().get(&number).cloned()
    }

    pub fn block_numbers(&self) -> Vec<u64> {
        self.blocks.lock().unwrap().keys().copied().collect()
    }

    /// Persisted transactions of a block, sorted by `order`.
    pub fn txs_of(&self, number: u64) -> Vec<TxRecord> {
        let mut txs: Vec<TxRecord> = self
            .txs
            .lock()
            .unwrap()
            .values()
            .filter(|tx| tx.block_number == number)
            .cloned()
            .collect();
        txs.sort_by_key(|tx| tx.order);
        txs
    }
}

impl ChainWriter for MemoryStore {
    fn ping(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            anyhow::bail!("Store is not reachable");
        }
        Ok(())
    }

    fn has_scanned(&self, number: u64) -> Result<bool> {
        Ok(self.pre_scanned.lock().unwrap().contains(&number)
            || self.blocks.lock().unwrap().contains_key(&number))
    }

    fn save_block(&self, block: &BlockRecord) -> Result<()> {
        self.block_saves.fetch_add(1, Ordering::SeqCst);
        let mut blocks = self.blocks.lock().unwrap();
        if blocks.contains_key(&block.number) {
            anyhow::bail!("Block {} is already stored", block.number);
        }
        blocks.insert(block.number, block.clone());
        Ok(())
    }

    fn save_tx(&self, tx: &TxRecord) -> Result<()> {
        self.tx_saves.fetch_add(1, Ordering::SeqCst);
        if self.failing_txs.lock().unwrap().contains(&tx.hash) {
            anyhow::bail!("Disk full");
        }
        let mut txs = self.txs.lock().unwrap();
        if txs.contains_key(&tx.hash) {
            anyhow::bail!("Transaction {:?} is already stored", tx.hash);
        }
        txs.insert(tx.hash, tx.clone());
        Ok(())
    }
}
