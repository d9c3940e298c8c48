//! Leader transfer against storage nodes
//!
//! The RPC surface of the storage layer is not part of the scheduler. The
//! operator executor talks to it through [`LeaderTransferClient`].

use thiserror::Error;
use tracing::{info, instrument};

use crate::event::ChangeLeaderEvent;

/// Transfer errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("Node unavailable: {0}")]
    NodeUnavailable(u64),

    #[error("Leader changed before transfer: range {0}")]
    LeaderChanged(u64),

    #[error("Transfer rejected: {0}")]
    Rejected(String),

    #[error("RPC error: {0}")]
    Rpc(String),
}

/// Result type for transfer operations
pub type Result<T> = std::result::Result<T, TransferError>;

/// Executes a leadership transfer on the storage layer
#[async_trait::async_trait]
pub trait LeaderTransferClient: Send + Sync {
    async fn transfer_leader(&self, event: &ChangeLeaderEvent) -> Result<()>;
}

/// Logs the transfer and reports success without contacting any node
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunTransferClient;

#[async_trait::async_trait]
impl LeaderTransferClient for DryRunTransferClient {
    #[instrument(skip(self, event), fields(range_id = event.range_id, operator_id = event.id))]
    async fn transfer_leader(&self, event: &ChangeLeaderEvent) -> Result<()> {
        info!(
            from = ?event.expected_leader,
            to = ?event.new_leader,
            creator = %event.creator,
            "Would transfer leader"
        );
        Ok(())
    }
}
