//! rangemaster Core Library
//!
//! Entity model shared by every rangemaster component:
//! - Peers and shard identity records
//! - Ranges with their per-range lock and lock-free write statistics
//! - Storage nodes with heartbeat-reported load
//! - Common error handling

pub mod error;
pub mod node;
pub mod ops_stat;
pub mod peer;
pub mod range;

pub use error::{RangeMasterError, Result};
pub use node::{Node, NodeState, NodeStats};
pub use ops_stat::{RangeOpsStat, OPS_STAT_CAPACITY};
pub use peer::{Peer, PeerStats, RangeEpoch, RangeMeta};
pub use range::{Range, RangeAccess, RangeRef, RangeState};
