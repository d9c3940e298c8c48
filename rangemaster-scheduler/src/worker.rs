//! Periodic scheduler workers
//!
//! Every worker runs in its own task and ticks on its own interval. A cycle
//! runs inline in that task, so cycles of one worker never overlap and a
//! cancellation is only observed between cycles.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cluster::Cluster;
use crate::config::ConfigError;
use crate::error::{Result, SchedulerError};

/// A periodic scheduling task
pub trait Worker: Send + Sync {
    fn name(&self) -> &str;

    /// Time between cycles
    fn interval(&self) -> Duration;

    /// One scheduling cycle. Must not block on I/O.
    fn work(&self, cluster: &Cluster);

    /// Gate checked before every cycle
    fn allow_work(&self, cluster: &Cluster) -> bool;

    /// Stop the worker after its current cycle
    fn stop(&self);

    /// Token the worker loop watches
    fn cancellation(&self) -> CancellationToken;
}

struct WorkerSlot {
    worker: Arc<dyn Worker>,
    handle: JoinHandle<()>,
}

/// Owns the worker tasks and their shared cancellation root
pub struct WorkerManager {
    cluster: Arc<Cluster>,
    token: CancellationToken,
    workers: Mutex<HashMap<String, WorkerSlot>>,
}

impl WorkerManager {
    pub fn new(cluster: Arc<Cluster>) -> Self {
        Self {
            cluster,
            token: CancellationToken::new(),
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Root token; workers derive their own tokens from it
    pub fn cancellation(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Register a worker and start its loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn add_worker(&self, worker: Arc<dyn Worker>) -> Result<()> {
        let name = worker.name().to_string();
        if worker.interval().is_zero() {
            return Err(ConfigError::InvalidValue(
                format!("{} interval", name),
                "must be greater than zero".to_string(),
            )
            .into());
        }

        let mut workers = self.workers.lock();
        if workers.contains_key(&name) {
            return Err(SchedulerError::WorkerExists(name));
        }

        let handle = tokio::spawn(run_worker(
            worker.clone(),
            self.cluster.clone(),
            self.token.clone(),
        ));
        workers.insert(name.clone(), WorkerSlot { worker, handle });
        info!(worker = %name, "Worker added");
        Ok(())
    }

    /// Stop a worker and forget it
    pub fn remove_worker(&self, name: &str) -> Result<()> {
        let slot = self
            .workers
            .lock()
            .remove(name)
            .ok_or_else(|| SchedulerError::WorkerNotFound(name.to_string()))?;
        slot.worker.stop();
        info!(worker = name, "Worker removed");
        Ok(())
    }

    pub fn worker_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.workers.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.workers
            .lock()
            .get(name)
            .is_some_and(|slot| !slot.handle.is_finished())
    }

    /// Cancel every worker, including ones whose token is not derived from
    /// [`WorkerManager::cancellation`]
    pub fn shutdown(&self) {
        info!("Stopping all workers");
        self.token.cancel();
        for slot in self.workers.lock().values() {
            slot.worker.stop();
        }
    }

    /// Wait for every registered worker loop to exit
    pub async fn join(&self) {
        let slots: Vec<_> = self.workers.lock().drain().collect();
        let results = join_all(slots.into_iter().map(|(_, slot)| slot.handle)).await;
        for result in results {
            if let Err(e) = result {
                warn!(error = %e, "Worker task ended abnormally");
            }
        }
    }
}

async fn run_worker(worker: Arc<dyn Worker>, cluster: Arc<Cluster>, root: CancellationToken) {
    let token = worker.cancellation();
    let period = worker.interval();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(worker = worker.name(), interval = ?period, "Worker started");

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = root.cancelled() => break,
            _ = ticker.tick() => {
                if worker.allow_work(&cluster) {
                    worker.work(&cluster);
                } else {
                    debug!(worker = worker.name(), "Work not allowed, skipping cycle");
                }
            }
        }
    }

    info!(worker = worker.name(), "Worker stopped");
}
