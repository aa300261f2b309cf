//! Head tracking and the catch-up to live-tail switchover
//!
//! The coordinator is a single task that owns [`HeadState`]. Workers report
//! scanned block numbers through a [`CoordinatorHandle`]; because every report
//! is handled in turn by the one owner of the state, the
//! "reached head and not yet subscribed" check and the subscribe that follows
//! cannot interleave, so at most one subscription is opened per stale period.
//!
//! While live, a listener task forwards each `newHeads` notification into the
//! job queue and tells the coordinator to advance the head. When the feed
//! fails the coordinator drops back to catching up; the next worker to reach
//! the recorded head opens a fresh subscription.

use crate::node::{HeadSubscription, RemoteNode};
use crate::queue::JobQueue;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Latest known head and whether the live feed is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadState {
    pub head: u64,
    pub subscribed: bool,
}

#[derive(Debug)]
enum Message {
    /// A worker finished block `number`.
    Scanned(u64),
    /// The listener of subscription `generation` queued a live head.
    LiveHead { generation: u64, number: u64 },
    /// Subscription `generation` failed or its transport closed.
    SubscriptionLost { generation: u64, error: anyhow::Error },
}

/// Cheap, cloneable access to a running coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    mailbox: mpsc::UnboundedSender<Message>,
    state: watch::Receiver<HeadState>,
}

impl CoordinatorHandle {
    /// Report a successfully scanned block. Never blocks.
    pub fn report_scanned(&self, number: u64) {
        if self.mailbox.send(Message::Scanned(number)).is_err() {
            debug!("Coordinator stopped, dropping report for block {}", number);
        }
    }

    /// Snapshot of the current head state.
    pub fn state(&self) -> HeadState {
        *self.state.borrow()
    }

    /// Receiver that observes every head state change.
    pub fn watch(&self) -> watch::Receiver<HeadState> {
        self.state.clone()
    }
}

/// Owner of [`HeadState`].
pub struct HeadCoordinator {
    node: Arc<dyn RemoteNode>,
    jobs: JobQueue,
    events_capacity: usize,
    state: HeadState,
    state_tx: watch::Sender<HeadState>,
    inbox: mpsc::UnboundedReceiver<Message>,
    mailbox: mpsc::UnboundedSender<Message>,
    /// Bumped per opened subscription; stale listener messages are ignored.
    generation: u64,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl HeadCoordinator {
    /// Start the coordinator in catch-up mode with the head observed at startup.
    ///
    /// The coordinator and every listener it starts run on `tracker` and stop
    /// when `cancel` fires.
    pub fn spawn(
        node: Arc<dyn RemoteNode>,
        jobs: JobQueue,
        head: u64,
        events_capacity: usize,
        cancel: CancellationToken,
        tracker: &TaskTracker,
    ) -> CoordinatorHandle {
        let state = HeadState {
            head,
            subscribed: false,
        };
        let (state_tx, state_rx) = watch::channel(state);
        let (mailbox, inbox) = mpsc::unbounded_channel();

        let coordinator = Self {
            node,
            jobs,
            events_capacity,
            state,
            state_tx,
            inbox,
            mailbox: mailbox.clone(),
            generation: 0,
            cancel,
            tracker: tracker.clone(),
        };
        tracker.spawn(coordinator.run());

        CoordinatorHandle {
            mailbox,
            state: state_rx,
        }
    }

    async fn run(mut self) {
        debug!("Head coordinator started at head {}", self.state.head);
        loop {
            let msg = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                msg = self.inbox.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
            };

            match msg {
                Message::Scanned(number) => self.on_scanned(number).await,
                Message::LiveHead { generation, number } => {
                    if generation == self.generation && self.state.subscribed {
                        self.state.head = number;
                        self.publish();
                    }
                }
                Message::SubscriptionLost { generation, error } => {
                    if generation == self.generation && self.state.subscribed {
                        warn!(
                            "Lost newHeads subscription at head {}: {:#}",
                            self.state.head, error
                        );
                        self.state.subscribed = false;
                        self.publish();
                    }
                }
            }
        }
        debug!("Head coordinator stopped");
    }

    async fn on_scanned(&mut self, number: u64) {
        if self.state.subscribed || number < self.state.head {
            return;
        }

        info!(
            "Block {} reached head {}, subscribing to new heads",
            number, self.state.head
        );
        let subscription = tokio::select! {
            _ = self.cancel.cancelled() => return,
            result = self.node.subscribe_new_heads(self.events_capacity) => result,
        };

        match subscription {
            Ok(subscription) => {
                self.generation += 1;
                self.state.subscribed = true;
                self.state.head = self.state.head.max(number);
                self.publish();
                info!("Subscribed to new blocks, now following the chain head");

                self.tracker.spawn(listen(
                    subscription,
                    self.generation,
                    self.jobs.clone(),
                    self.mailbox.clone(),
                    self.cancel.clone(),
                ));
            }
            Err(e) => {
                // Stay in catch-up; the next worker at the head tries again.
                warn!("Failed to subscribe to new heads: {:#}", e);
            }
        }
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.state);
    }
}

/// Forward live heads into the job queue until the feed fails or shutdown.
///
/// Heads delivered before a feed error are still queued. The subscription
/// reader has exited by the time this returns.
async fn listen(
    mut subscription: HeadSubscription,
    generation: u64,
    jobs: JobQueue,
    mailbox: mpsc::UnboundedSender<Message>,
    cancel: CancellationToken,
) {
    let forwarder = HeadForwarder {
        generation,
        jobs,
        mailbox,
        cancel,
    };

    loop {
        tokio::select! {
            biased;
            _ = forwarder.cancel.cancelled() => break,
            error = subscription.errors.recv() => {
                let error = error
                    .unwrap_or_else(|| anyhow::anyhow!("Subscription error channel closed"));
                while let Ok(header) = subscription.heads.try_recv() {
                    if !forwarder.forward(header.number).await {
                        break;
                    }
                }
                forwarder.lost(error);
                break;
            }
            header = subscription.heads.recv() => {
                let Some(header) = header else {
                    forwarder.lost(anyhow::anyhow!("Subscription feed ended"));
                    break;
                };
                if !forwarder.forward(header.number).await {
                    break;
                }
            }
        }
    }

    subscription.close().await;
}

struct HeadForwarder {
    generation: u64,
    jobs: JobQueue,
    mailbox: mpsc::UnboundedSender<Message>,
    cancel: CancellationToken,
}

impl HeadForwarder {
    /// Queue a live head. Returns false once the queue stops accepting jobs.
    async fn forward(&self, number: u64) -> bool {
        if let Err(e) = self.jobs.push(number, &self.cancel).await {
            debug!("Stopped forwarding live heads: {:#}", e);
            return false;
        }
        debug!("Queued live head {}", number);
        let _ = self.mailbox.send(Message::LiveHead {
            generation: self.generation,
            number,
        });
        true
    }

    fn lost(&self, error: anyhow::Error) {
        let _ = self.mailbox.send(Message::SubscriptionLost {
            generation: self.generation,
            error,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockNode;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    fn start(node: &Arc<MockNode>, head: u64) -> (CoordinatorHandle, JobQueue, CancellationToken) {
        let jobs = JobQueue::new(16);
        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        let handle = HeadCoordinator::spawn(
            node.clone(),
            jobs.clone(),
            head,
            16,
            cancel.clone(),
            &tracker,
        );
        (handle, jobs, cancel)
    }

    async fn wait_for(handle: &CoordinatorHandle, f: impl FnMut(&HeadState) -> bool) -> HeadState {
        let mut rx = handle.watch();
        let state = tokio::time::timeout(WAIT, rx.wait_for(f))
            .await
            .expect("timed out waiting for head state")
            .expect("coordinator stopped");
        *state
    }

    #[tokio::test]
    async fn test_below_head_does_not_subscribe() {
        let node = Arc::new(MockNode::new(12));
        let (handle, _jobs, cancel) = start(&node, 12);

        for n in 0..12 {
            handle.report_scanned(n);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(node.subscriptions_opened(), 0);
        assert_eq!(
            handle.state(),
            HeadState {
                head: 12,
                subscribed: false
            }
        );
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_concurrent_threshold_crossings_open_one_subscription() {
        let node = Arc::new(MockNode::new(12).with_subscribe_delay(Duration::from_millis(20)));
        let (handle, _jobs, cancel) = start(&node, 12);

        let mut reporters = Vec::new();
        for i in 0..32 {
            let handle = handle.clone();
            reporters.push(tokio::spawn(async move {
                handle.report_scanned(12 + i % 3);
            }));
        }
        for reporter in reporters {
            reporter.await.unwrap();
        }

        let state = wait_for(&handle, |s| s.subscribed).await;
        assert!(state.head >= 12);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(node.subscriptions_opened(), 1);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_live_heads_are_queued_and_advance_head() {
        let node = Arc::new(MockNode::new(12));
        let (handle, jobs, cancel) = start(&node, 12);

        handle.report_scanned(12);
        wait_for(&handle, |s| s.subscribed).await;

        node.push_head(13).await;
        node.push_head(14).await;
        assert_eq!(tokio::time::timeout(WAIT, jobs.next()).await.unwrap(), Some(13));
        assert_eq!(tokio::time::timeout(WAIT, jobs.next()).await.unwrap(), Some(14));

        let state = wait_for(&handle, |s| s.head == 14).await;
        assert!(state.subscribed);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_subscription_error_reverts_to_catch_up() {
        let node = Arc::new(MockNode::new(12));
        let (handle, jobs, cancel) = start(&node, 12);

        handle.report_scanned(12);
        wait_for(&handle, |s| s.subscribed).await;
        node.push_head(13).await;
        assert_eq!(tokio::time::timeout(WAIT, jobs.next()).await.unwrap(), Some(13));
        wait_for(&handle, |s| s.head == 13).await;

        node.fail_subscription("connection reset").await;
        let state = wait_for(&handle, |s| !s.subscribed).await;
        assert_eq!(state.head, 13);

        // Notifications after the failure are not forwarded.
        node.push_head(14).await;
        let idle = tokio::time::timeout(Duration::from_millis(100), jobs.next()).await;
        assert!(idle.is_err(), "no live head may be queued while catching up");

        // Only reaching the last recorded head resubscribes.
        handle.report_scanned(12);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(node.subscriptions_opened(), 1);

        handle.report_scanned(13);
        wait_for(&handle, |s| s.subscribed).await;
        assert_eq!(node.subscriptions_opened(), 2);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_head_delivered_before_error_is_still_queued() {
        let node = Arc::new(MockNode::new(12));
        let (handle, jobs, cancel) = start(&node, 12);

        handle.report_scanned(12);
        wait_for(&handle, |s| s.subscribed).await;

        node.push_head(13).await;
        node.fail_subscription("connection reset").await;

        assert_eq!(tokio::time::timeout(WAIT, jobs.next()).await.unwrap(), Some(13));
        let state = wait_for(&handle, |s| !s.subscribed).await;
        assert_eq!(state.head, 13);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_listener_closes_subscription_on_shutdown() {
        let node = Arc::new(MockNode::new(12));
        let jobs = JobQueue::new(16);
        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        let handle =
            HeadCoordinator::spawn(node.clone(), jobs, 12, 16, cancel.clone(), &tracker);

        handle.report_scanned(12);
        wait_for(&handle, |s| s.subscribed).await;

        cancel.cancel();
        tracker.close();
        tokio::time::timeout(WAIT, tracker.wait()).await.unwrap();
        assert!(node.reader_stopped());
    }

    #[tokio::test]
    async fn test_failed_subscribe_stays_catching_up() {
        let node = Arc::new(MockNode::new(12));
        node.set_subscribe_failure(true);
        let (handle, _jobs, cancel) = start(&node, 12);

        handle.report_scanned(12);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.state().subscribed);

        node.set_subscribe_failure(false);
        handle.report_scanned(12);
        wait_for(&handle, |s| s.subscribed).await;
        assert_eq!(node.subscriptions_opened(), 1);
        cancel.cancel();
    }
}
