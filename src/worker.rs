//! Block scanning and the worker pool
//!
//! A [`Scanner`] turns one block number into persisted rows. Workers pull
//! numbers off the [`JobQueue`], scan them and report successes to the head
//! coordinator. A failed scan is logged and the number dropped; workers never
//! exit on a scan error.

use crate::coordinator::CoordinatorHandle;
use crate::limiter::RateLimiter;
use crate::node::RemoteNode;
use crate::queue::JobQueue;
use crate::records::{BlockRecord, TxRecord};
use crate::store::ChainWriter;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Result of scanning one block number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// The store already had the block; nothing was fetched.
    Skipped,
    /// The block row was written along with `transactions` transaction rows.
    /// `failed` transactions were dropped.
    Stored { transactions: usize, failed: usize },
    /// Shutdown began while waiting for a rate-limit permit.
    Cancelled,
}

pub struct Scanner {
    node: Arc<dyn RemoteNode>,
    store: Arc<dyn ChainWriter>,
    limiter: Arc<RateLimiter>,
    timeout: Duration,
}

impl Scanner {
    pub fn new(
        node: Arc<dyn RemoteNode>,
        store: Arc<dyn ChainWriter>,
        limiter: Arc<RateLimiter>,
        timeout: Duration,
    ) -> Self {
        Self {
            node,
            store,
            limiter,
            timeout,
        }
    }

    /// Scan block `number` into the store.
    ///
    /// The permit wait observes `cancel`. Once a permit is held the fetch and
    /// the writes run to completion or until the scan timeout expires.
    pub async fn scan(&self, number: u64, cancel: &CancellationToken) -> Result<ScanOutcome> {
        if self
            .store
            .has_scanned(number)
            .with_context(|| format!("Failed to check whether block {} was scanned", number))?
        {
            return Ok(ScanOutcome::Skipped);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(ScanOutcome::Cancelled),
            _ = self.limiter.take() => {}
        }

        tokio::time::timeout(self.timeout, self.fetch_and_store(number))
            .await
            .with_context(|| format!("Scan of block {} timed out after {:?}", number, self.timeout))?
    }

    async fn fetch_and_store(&self, number: u64) -> Result<ScanOutcome> {
        let block = self
            .node
            .block_by_number(number)
            .await
            .with_context(|| format!("Failed to fetch block {}", number))?;
        if block.number != number {
            anyhow::bail!("Node returned block {} for number {}", block.number, number);
        }

        let tx_count = self
            .node
            .transaction_count(block.hash)
            .await
            .with_context(|| format!("Failed to fetch transaction count of block {}", number))?;
        let signer = self
            .node
            .signer_context()
            .await
            .context("Failed to fetch signer context")?;

        self.store
            .save_block(&BlockRecord {
                number,
                hash: block.hash,
                timestamp: block.timestamp,
                tx_count,
            })
            .with_context(|| format!("Failed to save block {}", number))?;

        let mut failed = 0;
        for (order, tx) in block.transactions.iter().enumerate() {
            let order = u32::try_from(order)
                .with_context(|| format!("Block {} has too many transactions", number))?;

            let from = match self.node.recover_sender(&signer, tx) {
                Ok(from) => from,
                Err(e) => {
                    warn!("Skipping tx {:?} in block {}: {:#}", tx.hash, number, e);
                    failed += 1;
                    continue;
                }
            };

            let record = TxRecord {
                hash: tx.hash,
                block_number: number,
                from,
                to: tx.to,
                amount: tx.value,
                nonce: tx.nonce,
                timestamp: block.timestamp,
                order,
            };
            if let Err(e) = self.store.save_tx(&record) {
                warn!("Failed to save tx {:?} in block {}: {:#}", tx.hash, number, e);
                failed += 1;
            }
        }

        Ok(ScanOutcome::Stored {
            transactions: block.transactions.len() - failed,
            failed,
        })
    }
}

/// Start `count` workers on `tracker`.
pub fn spawn_workers(
    count: usize,
    scanner: Arc<Scanner>,
    jobs: JobQueue,
    coordinator: CoordinatorHandle,
    cancel: CancellationToken,
    tracker: &TaskTracker,
) {
    for id in 0..count {
        tracker.spawn(run_worker(
            id,
            scanner.clone(),
            jobs.clone(),
            coordinator.clone(),
            cancel.clone(),
        ));
    }
}

async fn run_worker(
    id: usize,
    scanner: Arc<Scanner>,
    jobs: JobQueue,
    coordinator: CoordinatorHandle,
    cancel: CancellationToken,
) {
    debug!("Worker {} started", id);
    loop {
        let number = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            job = jobs.next() => match job {
                Some(number) => number,
                None => break,
            },
        };

        match scanner.scan(number, &cancel).await {
            Ok(ScanOutcome::Skipped) => {
                coordinator.report_scanned(number);
                info!("Block {} already scanned, skipping", number);
            }
            Ok(ScanOutcome::Stored {
                transactions,
                failed,
            }) => {
                coordinator.report_scanned(number);
                if failed > 0 {
                    info!(
                        "Scanned block {} ({} txs, {} dropped)",
                        number, transactions, failed
                    );
                } else {
                    info!("Scanned block {} ({} txs)", number, transactions);
                }
            }
            Ok(ScanOutcome::Cancelled) => break,
            Err(e) => error!("Worker {} dropped block {}: {:#}", id, number, e),
        }
    }
    debug!("Worker {} stopped", id);
}
