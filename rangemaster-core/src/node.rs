//! Storage node model
//!
//! Nodes are owned by the cluster and shared read-mostly by every scheduler
//! worker. Liveness and load fields are written by heartbeat ingestion; the
//! scheduler only reads them.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::range::RangeRef;

/// Node membership state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeState {
    /// Registered and heartbeating
    #[default]
    Login,
    /// Missed heartbeats
    Offline,
    /// Being drained before shutdown
    Logout,
    /// Permanently removed
    Tombstone,
}

/// Load figures reported by the node's heartbeat
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeStats {
    /// Ranges this node currently leads
    pub leader_count: u64,
    /// Ranges this node hosts a replica for
    pub range_count: u64,
    /// Write operations per second
    pub write_ops: u64,
    pub bytes_written: u64,
    /// Total storage capacity in bytes
    pub capacity: u64,
    /// Used storage in bytes
    pub used_size: u64,
}

impl NodeStats {
    /// Fraction of capacity in use; a node reporting no capacity counts as full
    pub fn storage_used_ratio(&self) -> f64 {
        if self.capacity == 0 {
            1.0
        } else {
            self.used_size as f64 / self.capacity as f64
        }
    }
}

#[derive(Debug)]
struct NodeInner {
    state: NodeState,
    stats: NodeStats,
    ranges: HashMap<u64, RangeRef>,
    last_hb_time: DateTime<Utc>,
}

/// A storage server hosting replicas
#[derive(Debug)]
pub struct Node {
    id: u64,
    address: String,
    inner: RwLock<NodeInner>,
}

impl Node {
    pub fn new(id: u64, address: impl Into<String>) -> Self {
        Self {
            id,
            address: address.into(),
            inner: RwLock::new(NodeInner {
                state: NodeState::Login,
                stats: NodeStats::default(),
                ranges: HashMap::new(),
                last_hb_time: Utc::now(),
            }),
        }
    }

    /// Builder-style stats initialisation
    pub fn with_stats(self, stats: NodeStats) -> Self {
        self.inner.write().stats = stats;
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn state(&self) -> NodeState {
        self.inner.read().state
    }

    pub fn set_state(&self, state: NodeState) {
        self.inner.write().state = state;
    }

    pub fn is_active(&self) -> bool {
        self.state() == NodeState::Login
    }

    pub fn stats(&self) -> NodeStats {
        self.inner.read().stats.clone()
    }

    /// Apply a heartbeat's load report
    pub fn update_stats(&self, stats: NodeStats) {
        let mut inner = self.inner.write();
        inner.stats = stats;
        inner.last_hb_time = Utc::now();
    }

    pub fn last_hb_time(&self) -> DateTime<Utc> {
        self.inner.read().last_hb_time
    }

    pub fn leader_count(&self) -> u64 {
        self.inner.read().stats.leader_count
    }

    /// Leadership load used for balancing
    pub fn leader_score(&self) -> f64 {
        self.leader_count() as f64
    }

    pub fn write_ops(&self) -> u64 {
        self.inner.read().stats.write_ops
    }

    pub fn storage_used_ratio(&self) -> f64 {
        self.inner.read().stats.storage_used_ratio()
    }

    // ===== Hosted ranges =====

    pub fn add_range(&self, id: u64, range: RangeRef) {
        self.inner.write().ranges.insert(id, range);
    }

    pub fn remove_range(&self, id: u64) -> Option<RangeRef> {
        self.inner.write().ranges.remove(&id)
    }

    pub fn has_range(&self, id: u64) -> bool {
        self.inner.read().ranges.contains_key(&id)
    }

    /// Snapshot of hosted ranges, ordered by range id
    pub fn all_ranges(&self) -> Vec<RangeRef> {
        let inner = self.inner.read();
        let mut ids: Vec<_> = inner.ranges.keys().copied().collect();
        ids.sort_unstable();
        ids.into_iter()
            .filter_map(|id| inner.ranges.get(&id).cloned())
            .collect()
    }

    pub fn range_count(&self) -> usize {
        self.inner.read().ranges.len()
    }
}
