//! Prometheus Metrics for the scheduler
//!
//! Workers and the operator executor report through [`MetricCollector`] so
//! tests can count outcomes without a global recorder.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};

use metrics::{counter, describe_counter};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use parking_lot::Mutex;

/// Counter of scheduling outcomes, labelled by worker and outcome
pub const SCHEDULE_COUNTER: &str = "schedule_counter_total";

/// Outcome labels recorded by the scheduler
pub mod labels {
    pub const NEW_OPERATOR: &str = "new_operator";
    pub const NO_NODE: &str = "no_node";
    pub const OPERATOR_FINISHED: &str = "operator_finished";
    pub const OPERATOR_FAILED: &str = "operator_failed";
    pub const OPERATOR_TIMEOUT: &str = "operator_timeout";
    pub const OPERATOR_CANCELLED: &str = "operator_cancelled";
}

/// Fire-and-forget schedule counters
pub trait MetricCollector: Send + Sync {
    fn collect_schedule_counter(&self, worker: &str, label: &str);
}

/// Install the Prometheus recorder and serve `/metrics` on `port`
pub fn init_metrics(port: u16) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
        .install()?;
    describe_metrics();
    Ok(())
}

/// Register metric descriptions with the installed recorder
pub fn describe_metrics() {
    describe_counter!(
        SCHEDULE_COUNTER,
        "Scheduling outcomes by worker and label"
    );
}

/// Records through the global `metrics` recorder
#[derive(Debug, Default, Clone, Copy)]
pub struct PrometheusCollector;

impl MetricCollector for PrometheusCollector {
    fn collect_schedule_counter(&self, worker: &str, label: &str) {
        counter!(
            SCHEDULE_COUNTER,
            "worker" => worker.to_string(),
            "label" => label.to_string()
        )
        .increment(1);
    }
}

/// Counts in memory, keyed by (worker, label)
#[derive(Debug, Default)]
pub struct MemoryCollector {
    counters: Mutex<HashMap<(String, String), u64>>,
}

impl MemoryCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, worker: &str, label: &str) -> u64 {
        self.counters
            .lock()
            .get(&(worker.to_string(), label.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Sum of a label across every worker
    pub fn total(&self, label: &str) -> u64 {
        self.counters
            .lock()
            .iter()
            .filter(|((_, l), _)| l == label)
            .map(|(_, v)| *v)
            .sum()
    }
}

impl MetricCollector for MemoryCollector {
    fn collect_schedule_counter(&self, worker: &str, label: &str) {
        *self
            .counters
            .lock()
            .entry((worker.to_string(), label.to_string()))
            .or_default() += 1;
    }
}
