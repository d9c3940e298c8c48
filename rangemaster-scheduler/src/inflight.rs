//! Nodes targeted by an unresolved balancing operator
//!
//! Workers insert the target node when they emit an operator; the operator
//! executor removes it once the operator finishes, whatever the outcome.
//! Entries never expire: an operator that is lost before completion keeps its
//! target out of balancing until the set is cleared by hand.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

/// Shared set of in-flight node ids
#[derive(Debug, Clone, Default)]
pub struct InflightNodes {
    nodes: Arc<Mutex<HashSet<u64>>>,
}

impl InflightNodes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert if absent. Returns `false` when the node was already in flight.
    pub fn insert(&self, node_id: u64) -> bool {
        self.nodes.lock().insert(node_id)
    }

    /// Returns `true` if the node was present
    pub fn remove(&self, node_id: u64) -> bool {
        self.nodes.lock().remove(&node_id)
    }

    pub fn contains(&self, node_id: u64) -> bool {
        self.nodes.lock().contains(&node_id)
    }

    pub fn len(&self) -> usize {
        self.nodes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.lock().is_empty()
    }

    /// Sorted copy of the current members
    pub fn snapshot(&self) -> Vec<u64> {
        let mut ids: Vec<_> = self.nodes.lock().iter().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.nodes.lock().clear();
    }
}
