//! Error types for rangemaster
//!
//! Provides a unified error type for the range and node model.

use thiserror::Error;

/// Result type alias for rangemaster operations
pub type Result<T> = std::result::Result<T, RangeMasterError>;

/// Unified error type for rangemaster
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RangeMasterError {
    // ===== Membership Errors =====
    #[error("Peer {peer_id} is not a member of range {range_id}")]
    InvalidPeer { range_id: u64, peer_id: u64 },

    #[error("Node not found: {0}")]
    NodeNotFound(u64),

    #[error("Range not found: {0}")]
    RangeNotFound(u64),

    // ===== ID Allocation Errors =====
    #[error("ID space exhausted")]
    IdExhausted,

    #[error("ID allocation failed: {0}")]
    IdAllocation(String),

    // ===== Configuration Errors =====
    #[error("Configuration error: {0}")]
    Configuration(String),

    // ===== Generic Errors =====
    #[error("Internal error: {0}")]
    Internal(String),
}
