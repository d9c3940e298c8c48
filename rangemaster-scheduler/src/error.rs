//! Scheduler errors

use rangemaster_core::RangeMasterError;
use thiserror::Error;

use crate::config::ConfigError;
use crate::dispatcher::DispatchError;

/// Scheduler errors
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Worker already registered: {0}")]
    WorkerExists(String),

    #[error("Worker not found: {0}")]
    WorkerNotFound(String),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Core(#[from] RangeMasterError),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
