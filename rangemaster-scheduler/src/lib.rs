//! Rangemaster Scheduler Library
//!
//! Leader balancing for a sharded, replicated key-value cluster.
//!
//! The scheduler watches node leader counts and, one range at a time:
//! - Moves leadership off nodes leading far more ranges than the mean
//! - Moves leadership onto nodes leading far fewer
//! - Hands each move to an operator executor without blocking the cycle
//! - Keeps a node out of further moves while one is in flight

pub mod balance;
pub mod cluster;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod id_gen;
pub mod inflight;
pub mod metrics;
pub mod requirement;
pub mod selector;
pub mod service;
pub mod transfer;
pub mod worker;

// Re-export main types
pub use balance::{
    count_leader_avg, select_change_leader, BalanceNodeLeaderWorker, LeaderDecision,
    BALANCE_LEADER_WORKER_NAME, MIN_LEADER_BALANCE_NUM,
};
pub use cluster::Cluster;
pub use config::{ConfigError, ScheduleOption, SchedulerConfig};
pub use dispatcher::{
    DispatchError, DispatcherConfig, EventDispatcher, EventReceiver, OperatorExecutor,
    OperatorOutcome,
};
pub use error::{Result, SchedulerError};
pub use event::{ChangeLeaderEvent, Event};
pub use id_gen::{AtomicIdGenerator, IdGenerator};
pub use inflight::InflightNodes;
pub use metrics::{init_metrics, MemoryCollector, MetricCollector, PrometheusCollector};
pub use requirement::{HealthyRangeRequirement, RangeRequirement};
pub use selector::{
    select_leader_node, select_most_and_least_leader_node, InflightNodeSelector, NodeSelector,
    StorageThresholdSelector, WriterOpsThresholdSelector,
};
pub use service::SchedulerService;
pub use transfer::{DryRunTransferClient, LeaderTransferClient, TransferError};
pub use worker::{Worker, WorkerManager};
