//! Replica and shard identity records
//!
//! These are the plain metadata values reported by storage nodes. The
//! scheduler-side [`Range`](crate::range::Range) wraps a [`RangeMeta`] and adds
//! leadership, health and load tracking.

use serde::{Deserialize, Serialize};

/// One replica of a range, located on one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Peer {
    pub id: u64,
    pub node_id: u64,
}

impl Peer {
    pub fn new(id: u64, node_id: u64) -> Self {
        Self { id, node_id }
    }
}

/// A peer reported as unreachable by the range leader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerStats {
    pub peer: Peer,
    /// How long the peer has been down, in seconds
    pub down_seconds: u64,
}

impl PeerStats {
    pub fn new(peer: Peer, down_seconds: u64) -> Self {
        Self { peer, down_seconds }
    }
}

/// Range configuration/version epoch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeEpoch {
    /// Bumped on every membership change
    pub conf_ver: u64,
    /// Bumped on every split or merge
    pub version: u64,
}

/// Shard identity record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeMeta {
    pub id: u64,
    pub table_id: u64,
    pub start_key: Vec<u8>,
    pub end_key: Vec<u8>,
    pub epoch: RangeEpoch,
    /// Replica set, in replica order
    pub peers: Vec<Peer>,
}

impl RangeMeta {
    pub fn new(id: u64, table_id: u64, peers: Vec<Peer>) -> Self {
        Self {
            id,
            table_id,
            peers,
            ..Default::default()
        }
    }

    /// Set the key span `[start_key, end_key)`
    pub fn with_keys(mut self, start_key: impl Into<Vec<u8>>, end_key: impl Into<Vec<u8>>) -> Self {
        self.start_key = start_key.into();
        self.end_key = end_key.into();
        self
    }

    pub fn has_peer(&self, peer_id: u64) -> bool {
        self.peers.iter().any(|p| p.id == peer_id)
    }
}
