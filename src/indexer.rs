//! Indexer lifecycle
//!
//! [`Indexer::start`] resolves the chain head and brings up the coordinator
//! and the worker pool. Range requests come in through an [`IndexerHandle`].
//! Shutdown stops admitting ranges, cancels every task, waits for them to
//! drain and then closes the job queue.

use crate::config::IndexerConfig;
use crate::coordinator::{CoordinatorHandle, HeadCoordinator, HeadState};
use crate::limiter::RateLimiter;
use crate::node::RemoteNode;
use crate::queue::JobQueue;
use crate::range::{parse_scan_range, range_len};
use crate::store::ChainWriter;
use crate::worker::{spawn_workers, Scanner};
use anyhow::{Context, Result};
use serde::Serialize;
use std::ops::RangeInclusive;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Liveness report.
#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub version: &'static str,
    /// `"ok"`, or the reason the store is unreachable
    pub store: String,
    pub head: u64,
    pub live: bool,
}

pub struct Indexer {
    store: Arc<dyn ChainWriter>,
    jobs: JobQueue,
    coordinator: CoordinatorHandle,
    cancel: CancellationToken,
    tracker: TaskTracker,
    max_range: u64,
}

impl Indexer {
    /// Start ingesting.
    ///
    /// Fails if the store or the remote node cannot be reached.
    pub async fn start(
        config: &IndexerConfig,
        node: Arc<dyn RemoteNode>,
        store: Arc<dyn ChainWriter>,
    ) -> Result<Self> {
        config.validate()?;
        let engine = &config.indexer;

        store.ping().context("Store is not reachable")?;
        let head = tokio::time::timeout(engine.timeout, node.latest_block_number())
            .await
            .context("Timed out fetching the chain head")?
            .context("Failed to fetch the chain head")?;
        info!("Chain head is block {}", head);

        let limiter = Arc::new(RateLimiter::new(
            config.limiter.rate,
            config.limiter.interval,
        )?);
        let jobs = JobQueue::new(engine.queue_capacity);
        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();

        let coordinator = HeadCoordinator::spawn(
            node.clone(),
            jobs.clone(),
            head,
            engine.events_capacity,
            cancel.clone(),
            &tracker,
        );
        let scanner = Arc::new(Scanner::new(node, store.clone(), limiter, engine.timeout));
        spawn_workers(
            engine.workers,
            scanner,
            jobs.clone(),
            coordinator.clone(),
            cancel.clone(),
            &tracker,
        );
        info!(
            "Started {} workers ({} calls per {:?})",
            engine.workers, config.limiter.rate, config.limiter.interval
        );

        Ok(Self {
            store,
            jobs,
            coordinator,
            cancel,
            tracker,
            max_range: engine.max_range,
        })
    }

    pub fn handle(&self) -> IndexerHandle {
        IndexerHandle {
            jobs: self.jobs.clone(),
            coordinator: self.coordinator.clone(),
            cancel: self.cancel.clone(),
            tracker: self.tracker.clone(),
            max_range: self.max_range,
        }
    }

    pub fn state(&self) -> HeadState {
        self.coordinator.state()
    }

    pub fn health(&self) -> Health {
        let state = self.coordinator.state();
        Health {
            version: env!("CARGO_PKG_VERSION"),
            store: match self.store.ping() {
                Ok(()) => "ok".to_string(),
                Err(e) => format!("{:#}", e),
            },
            head: state.head,
            live: state.subscribed,
        }
    }

    /// Stop all work and wait for in-flight scans to finish.
    pub async fn shutdown(self) {
        info!("Shutting down, waiting for in-flight work");
        self.tracker.close();
        self.cancel.cancel();
        self.tracker.wait().await;
        self.jobs.close();
        info!("goodbye");
    }

    /// Run until a termination signal, then shut down.
    ///
    /// A second signal during shutdown exits the process immediately.
    pub async fn run_until_signal(self) -> Result<()> {
        let signal = termination_signal().await?;
        info!("Received {}", signal);

        let shutdown = self.shutdown();
        tokio::pin!(shutdown);
        tokio::select! {
            _ = &mut shutdown => Ok(()),
            signal = termination_signal() => {
                let signal = signal?;
                warn!("Received {} during shutdown, exiting now", signal);
                std::process::exit(1)
            }
        }
    }
}

/// Submits range requests to a running indexer.
#[derive(Clone)]
pub struct IndexerHandle {
    jobs: JobQueue,
    coordinator: CoordinatorHandle,
    cancel: CancellationToken,
    tracker: TaskTracker,
    max_range: u64,
}

impl IndexerHandle {
    /// Enqueue every id of the range expression in ascending order.
    ///
    /// Returns as soon as the range is accepted; ids are pushed by a
    /// background task that stops at shutdown.
    pub fn scan(&self, expr: &str) -> Result<RangeInclusive<u64>> {
        if self.cancel.is_cancelled() || self.tracker.is_closed() {
            anyhow::bail!("Indexer is shutting down");
        }

        let head = self.coordinator.state().head;
        let range = parse_scan_range(expr, head)?;
        let len = range_len(&range);
        if len > self.max_range {
            anyhow::bail!(
                "Range of {} blocks exceeds the limit of {}",
                len,
                self.max_range
            );
        }

        let jobs = self.jobs.clone();
        let cancel = self.cancel.clone();
        let ids = range.clone();
        self.tracker.spawn(async move {
            let (start, end) = (*ids.start(), *ids.end());
            for number in ids {
                if let Err(e) = jobs.push(number, &cancel).await {
                    debug!("Stopped enqueueing {}..={}: {:#}", start, end, e);
                    return;
                }
            }
            debug!("Enqueued blocks {}..={}", start, end);
        });

        info!(
            "Scheduled scan of blocks {}..={} (head {})",
            range.start(),
            range.end(),
            head
        );
        Ok(range)
    }
}

#[cfg(unix)]
async fn termination_signal() -> Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut hangup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;
    let mut quit = signal(SignalKind::quit()).context("Failed to install SIGQUIT handler")?;

    let name = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl+C")?;
            "SIGINT"
        }
        _ = terminate.recv() => "SIGTERM",
        _ = hangup.recv() => "SIGHUP",
        _ = quit.recv() => "SIGQUIT",
    };
    Ok(name)
}

#[cfg(not(unix))]
async fn termination_signal() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    Ok("Ctrl+C")
}
