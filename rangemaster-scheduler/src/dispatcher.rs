//! Event Dispatcher
//!
//! Decouples balancing decisions from operator execution:
//! - Workers push events without blocking
//! - A single executor consumes them in order
//! - Each operator runs with a timeout and bounded retries
//! - On completion the target node leaves the in-flight set

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::event::{ChangeLeaderEvent, Event};
use crate::inflight::InflightNodes;
use crate::metrics::{labels, MetricCollector};
use crate::transfer::{LeaderTransferClient, TransferError};

/// Dispatch errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Event queue full, dropped operator {0}")]
    QueueFull(u64),

    #[error("Event dispatcher closed")]
    Closed,
}

/// Operator executor configuration
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Timeout per transfer attempt
    pub operator_timeout: Duration,
    /// Retries after the first failed attempt
    pub max_retries: u32,
    /// Delay between attempts
    pub retry_delay: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            operator_timeout: Duration::from_secs(30),
            max_retries: 2,
            retry_delay: Duration::from_millis(500),
        }
    }
}

/// How an operator ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorOutcome {
    Finished,
    Failed(TransferError),
    TimedOut,
}

impl OperatorOutcome {
    fn label(&self) -> &'static str {
        match self {
            OperatorOutcome::Finished => labels::OPERATOR_FINISHED,
            OperatorOutcome::Failed(_) => labels::OPERATOR_FAILED,
            OperatorOutcome::TimedOut => labels::OPERATOR_TIMEOUT,
        }
    }
}

/// Producer side, cheap to clone
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    tx: mpsc::Sender<Event>,
}

/// Consumer side, handed to [`OperatorExecutor::run`]
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::Receiver<Event>,
}

impl EventDispatcher {
    /// Create a bounded dispatcher
    pub fn channel(capacity: usize) -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, EventReceiver { rx })
    }

    /// Enqueue without waiting
    pub fn push_event(&self, event: impl Into<Event>) -> Result<(), DispatchError> {
        self.tx.try_send(event.into()).map_err(|e| match e {
            TrySendError::Full(event) => DispatchError::QueueFull(event.id()),
            TrySendError::Closed(_) => DispatchError::Closed,
        })
    }

    /// Events waiting to be executed
    pub fn pending(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl EventReceiver {
    /// Next event, or `None` once every dispatcher is dropped
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Next event if one is queued
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    /// Refuse new events; already queued ones can still be received
    pub fn close(&mut self) {
        self.rx.close();
    }
}

/// Executes operators and releases their in-flight marks
pub struct OperatorExecutor {
    config: DispatcherConfig,
    client: Arc<dyn LeaderTransferClient>,
    inflight: InflightNodes,
    metric: Arc<dyn MetricCollector>,
}

impl OperatorExecutor {
    pub fn new(
        config: DispatcherConfig,
        client: Arc<dyn LeaderTransferClient>,
        inflight: InflightNodes,
        metric: Arc<dyn MetricCollector>,
    ) -> Self {
        Self {
            config,
            client,
            inflight,
            metric,
        }
    }

    /// Consume events until cancelled or every dispatcher is dropped.
    ///
    /// An operator already running is finished before the token is checked
    /// again. Events still queued at shutdown release their in-flight marks.
    pub async fn run(self, mut receiver: EventReceiver, token: CancellationToken) {
        info!("Operator executor started");

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                next = receiver.recv() => match next {
                    Some(event) => {
                        self.handle(event).await;
                    }
                    None => {
                        debug!("All dispatchers dropped");
                        break;
                    }
                },
            }
        }

        // Later pushes fail, so the pusher releases its own mark
        receiver.close();
        let mut cancelled = 0;
        while let Some(event) = receiver.try_recv() {
            self.release(&event, labels::OPERATOR_CANCELLED);
            cancelled += 1;
        }

        info!(cancelled, "Operator executor stopped");
    }

    /// Execute one event and release its in-flight mark
    pub async fn handle(&self, event: Event) -> OperatorOutcome {
        let outcome = match &event {
            Event::TryChangeLeader(change) => self.change_leader(change).await,
        };

        match &outcome {
            OperatorOutcome::Finished => info!(
                operator_id = event.id(),
                range_id = event.range_id(),
                target_node = event.target_node_id(),
                "Operator finished"
            ),
            OperatorOutcome::Failed(e) => error!(
                operator_id = event.id(),
                range_id = event.range_id(),
                error = %e,
                "Operator failed"
            ),
            OperatorOutcome::TimedOut => error!(
                operator_id = event.id(),
                range_id = event.range_id(),
                timeout = ?self.config.operator_timeout,
                "Operator timed out"
            ),
        }

        self.release(&event, outcome.label());
        outcome
    }

    #[instrument(skip(self, event), fields(operator_id = event.id, range_id = event.range_id))]
    async fn change_leader(&self, event: &ChangeLeaderEvent) -> OperatorOutcome {
        let mut outcome = OperatorOutcome::TimedOut;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                debug!(attempt, "Retrying leader transfer");
                tokio::time::sleep(self.config.retry_delay).await;
            }

            outcome = match timeout(
                self.config.operator_timeout,
                self.client.transfer_leader(event),
            )
            .await
            {
                Ok(Ok(())) => return OperatorOutcome::Finished,
                // Retrying cannot help once the leader moved
                Ok(Err(e @ TransferError::LeaderChanged(_))) => {
                    return OperatorOutcome::Failed(e);
                }
                Ok(Err(e)) => {
                    warn!(attempt, error = %e, "Leader transfer attempt failed");
                    OperatorOutcome::Failed(e)
                }
                Err(_) => {
                    warn!(attempt, "Leader transfer attempt timed out");
                    OperatorOutcome::TimedOut
                }
            };
        }

        outcome
    }

    fn release(&self, event: &Event, label: &str) {
        self.inflight.remove(event.target_node_id());
        self.metric.collect_schedule_counter(event.creator(), label);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MemoryCollector;
    use parking_lot::Mutex;
    use rangemaster_core::Peer;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn make_event(id: u64, target_node: u64) -> ChangeLeaderEvent {
        ChangeLeaderEvent {
            id,
            range_id: id * 10,
            expected_leader: Some(Peer::new(1, 1)),
            new_leader: Peer::new(id * 100, target_node),
            creator: "test_worker".to_string(),
        }
    }

    /// Fails a fixed number of times, then succeeds
    struct FlakyClient {
        failures: AtomicU32,
        calls: AtomicU32,
        seen: Mutex<Vec<u64>>,
    }

    impl FlakyClient {
        fn new(failures: u32) -> Self {
            Self {
                failures: AtomicU32::new(failures),
                calls: AtomicU32::new(0),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl LeaderTransferClient for FlakyClient {
        async fn transfer_leader(
            &self,
            event: &ChangeLeaderEvent,
        ) -> crate::transfer::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().push(event.id);
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(TransferError::Rpc("connection reset".to_string()));
            }
            Ok(())
        }
    }

    struct StuckClient;

    #[async_trait::async_trait]
    impl LeaderTransferClient for StuckClient {
        async fn transfer_leader(&self, _: &ChangeLeaderEvent) -> crate::transfer::Result<()> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    struct MovedClient;

    #[async_trait::async_trait]
    impl LeaderTransferClient for MovedClient {
        async fn transfer_leader(&self, e: &ChangeLeaderEvent) -> crate::transfer::Result<()> {
            Err(TransferError::LeaderChanged(e.range_id))
        }
    }

    fn fast_config(max_retries: u32) -> DispatcherConfig {
        DispatcherConfig {
            operator_timeout: Duration::from_millis(50),
            max_retries,
            retry_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_dispatcher_config_default() {
        let config = DispatcherConfig::default();
        assert_eq!(config.operator_timeout, Duration::from_secs(30));
        assert_eq!(config.max_retries, 2);
    }

    #[test]
    fn test_push_event_queue_full() {
        let (dispatcher, _rx) = EventDispatcher::channel(1);
        dispatcher.push_event(make_event(1, 3)).unwrap();
        assert_eq!(dispatcher.pending(), 1);
        assert_eq!(
            dispatcher.push_event(make_event(2, 4)),
            Err(DispatchError::QueueFull(2))
        );
    }

    #[test]
    fn test_push_event_closed() {
        let (dispatcher, rx) = EventDispatcher::channel(4);
        drop(rx);
        assert!(dispatcher.is_closed());
        assert_eq!(
            dispatcher.push_event(make_event(1, 3)),
            Err(DispatchError::Closed)
        );
    }

    #[tokio::test]
    async fn test_handle_success_releases_node() {
        let inflight = InflightNodes::new();
        let metric = Arc::new(MemoryCollector::new());
        inflight.insert(3);

        let executor = OperatorExecutor::new(
            fast_config(0),
            Arc::new(FlakyClient::new(0)),
            inflight.clone(),
            metric.clone(),
        );

        let outcome = executor.handle(make_event(1, 3).into()).await;
        assert_eq!(outcome, OperatorOutcome::Finished);
        assert!(!inflight.contains(3));
        assert_eq!(metric.get("test_worker", labels::OPERATOR_FINISHED), 1);
    }

    #[tokio::test]
    async fn test_handle_retries_then_succeeds() {
        let client = Arc::new(FlakyClient::new(2));
        let executor = OperatorExecutor::new(
            fast_config(2),
            client.clone(),
            InflightNodes::new(),
            Arc::new(MemoryCollector::new()),
        );

        let outcome = executor.handle(make_event(1, 3).into()).await;
        assert_eq!(outcome, OperatorOutcome::Finished);
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_handle_failure_still_releases_node() {
        let inflight = InflightNodes::new();
        let metric = Arc::new(MemoryCollector::new());
        inflight.insert(3);

        let executor = OperatorExecutor::new(
            fast_config(1),
            Arc::new(FlakyClient::new(5)),
            inflight.clone(),
            metric.clone(),
        );

        let outcome = executor.handle(make_event(1, 3).into()).await;
        assert!(matches!(outcome, OperatorOutcome::Failed(TransferError::Rpc(_))));
        assert!(!inflight.contains(3));
        assert_eq!(metric.get("test_worker", labels::OPERATOR_FAILED), 1);
    }

    #[tokio::test]
    async fn test_leader_changed_is_not_retried() {
        let metric = Arc::new(MemoryCollector::new());
        let executor = OperatorExecutor::new(
            fast_config(3),
            Arc::new(MovedClient),
            InflightNodes::new(),
            metric.clone(),
        );

        let outcome = executor.handle(make_event(1, 3).into()).await;
        assert_eq!(
            outcome,
            OperatorOutcome::Failed(TransferError::LeaderChanged(10))
        );
    }

    #[tokio::test]
    async fn test_handle_timeout() {
        let inflight = InflightNodes::new();
        let metric = Arc::new(MemoryCollector::new());
        inflight.insert(3);

        let executor = OperatorExecutor::new(
            fast_config(0),
            Arc::new(StuckClient),
            inflight.clone(),
            metric.clone(),
        );

        let outcome = executor.handle(make_event(1, 3).into()).await;
        assert_eq!(outcome, OperatorOutcome::TimedOut);
        assert!(!inflight.contains(3));
        assert_eq!(metric.get("test_worker", labels::OPERATOR_TIMEOUT), 1);
    }

    #[tokio::test]
    async fn test_run_executes_in_order() {
        let (dispatcher, receiver) = EventDispatcher::channel(16);
        let client = Arc::new(FlakyClient::new(0));
        let inflight = InflightNodes::new();
        let metric = Arc::new(MemoryCollector::new());
        let token = CancellationToken::new();

        for id in 1..=3 {
            inflight.insert(id + 10);
            dispatcher.push_event(make_event(id, id + 10)).unwrap();
        }
        drop(dispatcher);

        OperatorExecutor::new(fast_config(0), client.clone(), inflight.clone(), metric.clone())
            .run(receiver, token)
            .await;

        assert_eq!(*client.seen.lock(), vec![1, 2, 3]);
        assert!(inflight.is_empty());
        assert_eq!(metric.get("test_worker", labels::OPERATOR_FINISHED), 3);
    }

    #[tokio::test]
    async fn test_run_cancelled_releases_queued_events() {
        let (dispatcher, receiver) = EventDispatcher::channel(16);
        let client = Arc::new(FlakyClient::new(0));
        let inflight = InflightNodes::new();
        let metric = Arc::new(MemoryCollector::new());
        let token = CancellationToken::new();

        inflight.insert(7);
        dispatcher.push_event(make_event(1, 7)).unwrap();
        token.cancel();

        OperatorExecutor::new(fast_config(0), client.clone(), inflight.clone(), metric.clone())
            .run(receiver, token)
            .await;

        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
        assert!(!inflight.contains(7));
        assert_eq!(metric.get("test_worker", labels::OPERATOR_CANCELLED), 1);
    }

    #[test]
    fn test_closed_receiver_drains_but_refuses_new_events() {
        let (dispatcher, mut receiver) = EventDispatcher::channel(16);
        dispatcher.push_event(make_event(1, 7)).unwrap();

        receiver.close();
        assert_eq!(
            dispatcher.push_event(make_event(2, 8)),
            Err(DispatchError::Closed)
        );
        assert_eq!(receiver.try_recv().map(|e| e.id()), Some(1));
        assert!(receiver.try_recv().is_none());
    }
}
