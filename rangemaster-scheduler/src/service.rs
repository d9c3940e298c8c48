//! Scheduler service
//!
//! Wires configuration into the cluster, the operator executor and the
//! worker manager, and owns their lifecycle.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::balance::BalanceNodeLeaderWorker;
use crate::cluster::Cluster;
use crate::config::SchedulerConfig;
use crate::dispatcher::{EventDispatcher, EventReceiver, OperatorExecutor};
use crate::error::Result;
use crate::id_gen::AtomicIdGenerator;
use crate::metrics::MetricCollector;
use crate::transfer::LeaderTransferClient;
use crate::worker::WorkerManager;

/// Running scheduler: cluster state, workers and the operator executor
pub struct SchedulerService {
    config: SchedulerConfig,
    cluster: Arc<Cluster>,
    manager: WorkerManager,
    pending: Option<(OperatorExecutor, EventReceiver)>,
    executor_token: CancellationToken,
    executor_handle: Option<JoinHandle<()>>,
}

impl SchedulerService {
    pub fn new(
        config: SchedulerConfig,
        client: Arc<dyn LeaderTransferClient>,
        metric: Arc<dyn MetricCollector>,
    ) -> Result<Self> {
        config.validate()?;

        let (dispatcher, receiver) = EventDispatcher::channel(config.event_queue_capacity);
        let cluster = Arc::new(
            Cluster::new(config.schedule_option(), dispatcher)
                .with_id_generator(Arc::new(AtomicIdGenerator::new(config.id_seed)))
                .with_metrics(metric.clone()),
        );

        let executor = OperatorExecutor::new(
            config.dispatcher_config(),
            client,
            cluster.inflight_nodes().clone(),
            metric,
        );

        Ok(Self {
            manager: WorkerManager::new(cluster.clone()),
            config,
            cluster,
            pending: Some((executor, receiver)),
            executor_token: CancellationToken::new(),
            executor_handle: None,
        })
    }

    /// Start the executor and the configured workers.
    ///
    /// Must be called from within a tokio runtime. Calling it twice is a
    /// no-op.
    pub fn start(&mut self) -> Result<()> {
        let Some((executor, receiver)) = self.pending.take() else {
            warn!("Scheduler already started");
            return Ok(());
        };

        self.executor_handle = Some(tokio::spawn(
            executor.run(receiver, self.executor_token.clone()),
        ));

        if self.config.enable_leader_balance {
            let worker = BalanceNodeLeaderWorker::new(
                self.config.leader_balance_interval(),
                &self.manager.cancellation(),
            );
            self.manager.add_worker(Arc::new(worker))?;
        }

        info!(
            workers = ?self.manager.worker_names(),
            dry_run = self.config.dry_run,
            "Scheduler started"
        );
        Ok(())
    }

    pub fn cluster(&self) -> &Arc<Cluster> {
        &self.cluster
    }

    pub fn manager(&self) -> &WorkerManager {
        &self.manager
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Stop workers, then the executor, and wait for both
    pub async fn shutdown(&mut self) {
        self.manager.shutdown();
        self.manager.join().await;

        self.executor_token.cancel();
        if let Some(handle) = self.executor_handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Operator executor ended abnormally");
            }
        }

        info!("Scheduler stopped");
    }
}
