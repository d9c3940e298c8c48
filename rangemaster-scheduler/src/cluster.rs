//! Shared cluster state
//!
//! The [`Cluster`] aggregate is read by every scheduler worker and written by
//! heartbeat ingestion. Workers never hold a private copy: each cycle reads
//! the current nodes and ranges, and the in-flight set keeps concurrent
//! cycles from targeting the same node twice.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rangemaster_core::{
    Node, NodeState, NodeStats, Range, RangeMasterError, RangeRef, Result,
};
use tracing::{debug, info, warn};

use crate::config::ScheduleOption;
use crate::dispatcher::{DispatchError, EventDispatcher};
use crate::event::Event;
use crate::id_gen::{AtomicIdGenerator, IdGenerator};
use crate::inflight::InflightNodes;
use crate::metrics::{MetricCollector, PrometheusCollector};
use crate::requirement::{HealthyRangeRequirement, RangeRequirement};

/// Nodes, ranges and scheduling collaborators
pub struct Cluster {
    nodes: RwLock<HashMap<u64, Arc<Node>>>,
    ranges: RwLock<HashMap<u64, RangeRef>>,
    option: ScheduleOption,
    id_gen: Arc<dyn IdGenerator>,
    metric: Arc<dyn MetricCollector>,
    requirement: Arc<dyn RangeRequirement>,
    auto_failover_unable: AtomicBool,
    inflight: InflightNodes,
    dispatcher: EventDispatcher,
}

impl Cluster {
    /// Create an empty cluster with the default collaborators
    pub fn new(option: ScheduleOption, dispatcher: EventDispatcher) -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            ranges: RwLock::new(HashMap::new()),
            option,
            id_gen: Arc::new(AtomicIdGenerator::default()),
            metric: Arc::new(PrometheusCollector),
            requirement: Arc::new(HealthyRangeRequirement),
            auto_failover_unable: AtomicBool::new(false),
            inflight: InflightNodes::new(),
            dispatcher,
        }
    }

    pub fn with_id_generator(mut self, id_gen: Arc<dyn IdGenerator>) -> Self {
        self.id_gen = id_gen;
        self
    }

    pub fn with_metrics(mut self, metric: Arc<dyn MetricCollector>) -> Self {
        self.metric = metric;
        self
    }

    pub fn with_requirement(mut self, requirement: Arc<dyn RangeRequirement>) -> Self {
        self.requirement = requirement;
        self
    }

    // ===== Nodes =====

    /// Register a node, replacing any node with the same id
    pub fn add_node(&self, node: Node) -> Arc<Node> {
        let node = Arc::new(node);
        self.nodes.write().insert(node.id(), node.clone());
        debug!(node_id = node.id(), address = node.address(), "Node added");
        node
    }

    pub fn remove_node(&self, node_id: u64) -> Option<Arc<Node>> {
        let removed = self.nodes.write().remove(&node_id);
        if removed.is_some() {
            self.inflight.remove(node_id);
            info!(node_id, "Node removed");
        }
        removed
    }

    pub fn find_node(&self, node_id: u64) -> Option<Arc<Node>> {
        self.nodes.read().get(&node_id).cloned()
    }

    /// Every node, ordered by id
    pub fn all_nodes(&self) -> Vec<Arc<Node>> {
        let mut nodes: Vec<_> = self.nodes.read().values().cloned().collect();
        nodes.sort_by_key(|n| n.id());
        nodes
    }

    /// Nodes in `Login` state, ordered by id
    pub fn active_nodes(&self) -> Vec<Arc<Node>> {
        self.all_nodes()
            .into_iter()
            .filter(|n| n.is_active())
            .collect()
    }

    /// Apply a node heartbeat's load report
    pub fn update_node_stats(&self, node_id: u64, stats: NodeStats) -> Result<()> {
        self.find_node(node_id)
            .ok_or(RangeMasterError::NodeNotFound(node_id))?
            .update_stats(stats);
        Ok(())
    }

    pub fn set_node_state(&self, node_id: u64, state: NodeState) -> Result<()> {
        self.find_node(node_id)
            .ok_or(RangeMasterError::NodeNotFound(node_id))?
            .set_state(state);
        Ok(())
    }

    // ===== Ranges =====

    /// Register a range and attach it to every node hosting one of its peers.
    ///
    /// A range already registered under the same id is replaced.
    pub fn add_range(&self, range: Range) -> RangeRef {
        let range_id = range.id();
        let node_ids = range.node_ids();
        let range = range.into_ref();

        let previous = self.ranges.write().insert(range_id, range.clone());
        if let Some(previous) = previous {
            let old_nodes = previous.read().node_ids();
            for node in old_nodes.iter().filter_map(|id| self.find_node(*id)) {
                node.remove_range(range_id);
            }
        }

        for node_id in node_ids {
            match self.find_node(node_id) {
                Some(node) => node.add_range(range_id, range.clone()),
                None => debug!(range_id, node_id, "Range peer on unknown node"),
            }
        }

        range
    }

    /// Drop a range and detach it from its nodes
    pub fn remove_range(&self, range_id: u64) -> Result<RangeRef> {
        let range = self
            .ranges
            .write()
            .remove(&range_id)
            .ok_or(RangeMasterError::RangeNotFound(range_id))?;

        let node_ids = range.read().node_ids();
        for node in node_ids.iter().filter_map(|id| self.find_node(*id)) {
            node.remove_range(range_id);
        }

        Ok(range)
    }

    pub fn find_range(&self, range_id: u64) -> Option<RangeRef> {
        self.ranges.read().get(&range_id).cloned()
    }

    pub fn range_count(&self) -> usize {
        self.ranges.read().len()
    }

    /// Known nodes hosting a replica of `range`, in replica order
    pub fn range_nodes(&self, range: &Range) -> Vec<Arc<Node>> {
        range
            .peers()
            .iter()
            .filter_map(|p| self.find_node(p.node_id))
            .collect()
    }

    /// Known nodes hosting a follower of `range`, ordered by id
    pub fn follower_nodes(&self, range: &Range) -> Vec<Arc<Node>> {
        let mut node_ids: Vec<_> = range.followers().into_keys().collect();
        node_ids.sort_unstable();
        node_ids
            .into_iter()
            .filter_map(|id| self.find_node(id))
            .collect()
    }

    /// Node hosting the leader of `range`
    pub fn leader_node(&self, range: &Range) -> Option<Arc<Node>> {
        range.leader().and_then(|l| self.find_node(l.node_id))
    }

    /// Whether `range` may be scheduled right now
    pub fn require(&self, range: &Range) -> bool {
        self.requirement.require(range, self)
    }

    // ===== Collaborators =====

    pub fn gen_id(&self) -> Result<u64> {
        self.id_gen.gen_id()
    }

    pub fn option(&self) -> &ScheduleOption {
        &self.option
    }

    pub fn inflight_nodes(&self) -> &InflightNodes {
        &self.inflight
    }

    pub fn metric(&self) -> &dyn MetricCollector {
        self.metric.as_ref()
    }

    pub fn push_event(&self, event: impl Into<Event>) -> std::result::Result<(), DispatchError> {
        self.dispatcher.push_event(event)
    }

    /// Whether automated remediation is paused
    pub fn auto_failover_unable(&self) -> bool {
        self.auto_failover_unable.load(Ordering::Acquire)
    }

    pub fn set_auto_failover_unable(&self, unable: bool) {
        let previous = self.auto_failover_unable.swap(unable, Ordering::AcqRel);
        if previous != unable {
            if unable {
                warn!("Automated failover disabled, balancing paused");
            } else {
                info!("Automated failover re-enabled");
            }
        }
    }
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("nodes", &self.nodes.read().len())
            .field("ranges", &self.ranges.read().len())
            .field("option", &self.option)
            .field("auto_failover_unable", &self.auto_failover_unable())
            .field("inflight", &self.inflight.snapshot())
            .finish()
    }
}
