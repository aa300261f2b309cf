//! Bounded job queue of block numbers
//!
//! Multi-producer, multi-consumer. Producers block when the buffer is full;
//! consumers take turns on the single receiver. Duplicates are not filtered.

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// Default number of block numbers buffered before producers block.
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

#[derive(Debug, Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<u64>,
    rx: Arc<Mutex<mpsc::Receiver<u64>>>,
    closed: CancellationToken,
}

impl JobQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            closed: CancellationToken::new(),
        }
    }

    /// Enqueue a block number, waiting for room.
    ///
    /// Gives up when `cancel` fires or the queue has been closed.
    pub async fn push(&self, number: u64, cancel: &CancellationToken) -> Result<()> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => anyhow::bail!("Cancelled while enqueueing block {}", number),
            _ = self.closed.cancelled() => anyhow::bail!("Job queue closed, dropping block {}", number),
            sent = self.tx.send(number) => {
                sent.map_err(|_| anyhow::anyhow!("Job queue closed, dropping block {}", number))
            }
        }
    }

    /// Dequeue the next block number.
    ///
    /// Returns `None` once the queue is closed and drained.
    pub async fn next(&self) -> Option<u64> {
        let mut rx = self.rx.lock().await;
        tokio::select! {
            biased;
            job = rx.recv() => job,
            _ = self.closed.cancelled() => rx.try_recv().ok(),
        }
    }

    /// Stop accepting jobs. Already buffered jobs can still be drained.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Number of jobs currently buffered.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
