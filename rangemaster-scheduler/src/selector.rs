//! Node selectors
//!
//! A selector chain filters candidate nodes before a balancer compares their
//! leader scores. Chains are evaluated in order and stop at the first
//! rejection.

use std::sync::Arc;

use rangemaster_core::Node;
use tracing::{debug, trace};

use crate::inflight::InflightNodes;

/// Filter (and optional score contribution) applied to candidate nodes
pub trait NodeSelector: Send + Sync {
    fn name(&self) -> &'static str;

    fn can_select(&self, node: &Node) -> bool;

    /// Extra score added when ranking candidates; lower is better
    fn score(&self, _node: &Node) -> f64 {
        0.0
    }
}

/// Rejects nodes whose write rate is above a threshold
#[derive(Debug, Clone, Copy)]
pub struct WriterOpsThresholdSelector {
    max_write_ops: u64,
}

impl WriterOpsThresholdSelector {
    pub fn new(max_write_ops: u64) -> Self {
        Self { max_write_ops }
    }
}

impl NodeSelector for WriterOpsThresholdSelector {
    fn name(&self) -> &'static str {
        "writer_ops_threshold"
    }

    fn can_select(&self, node: &Node) -> bool {
        node.write_ops() <= self.max_write_ops
    }
}

/// Rejects nodes whose disk is too full
#[derive(Debug, Clone, Copy)]
pub struct StorageThresholdSelector {
    max_used_ratio: f64,
}

impl StorageThresholdSelector {
    pub fn new(max_used_ratio: f64) -> Self {
        Self { max_used_ratio }
    }
}

impl NodeSelector for StorageThresholdSelector {
    fn name(&self) -> &'static str {
        "storage_threshold"
    }

    fn can_select(&self, node: &Node) -> bool {
        if node.stats().capacity == 0 {
            debug!(node_id = node.id(), "Node reports no capacity, treated as full");
            return false;
        }
        node.storage_used_ratio() <= self.max_used_ratio
    }
}

/// Rejects nodes that are already the target of a pending operator
#[derive(Debug, Clone)]
pub struct InflightNodeSelector {
    inflight: InflightNodes,
}

impl InflightNodeSelector {
    pub fn new(inflight: InflightNodes) -> Self {
        Self { inflight }
    }
}

impl NodeSelector for InflightNodeSelector {
    fn name(&self) -> &'static str {
        "inflight_node"
    }

    fn can_select(&self, node: &Node) -> bool {
        !self.inflight.contains(node.id())
    }
}

fn eligible(node: &Node, selectors: &[Box<dyn NodeSelector>]) -> bool {
    if !node.is_active() {
        return false;
    }
    match selectors.iter().find(|s| !s.can_select(node)) {
        Some(selector) => {
            trace!(node_id = node.id(), selector = selector.name(), "Node filtered");
            false
        }
        None => true,
    }
}

/// Active nodes passing every selector with the highest and lowest leader
/// score. Ties keep the first node encountered.
pub fn select_most_and_least_leader_node(
    nodes: &[Arc<Node>],
    selectors: &[Box<dyn NodeSelector>],
) -> (Option<Arc<Node>>, Option<Arc<Node>>) {
    let mut most: Option<(&Arc<Node>, f64)> = None;
    let mut least: Option<(&Arc<Node>, f64)> = None;

    for node in nodes.iter().filter(|n| eligible(n, selectors)) {
        let score = node.leader_score();
        if most.map_or(true, |(_, s)| score > s) {
            most = Some((node, score));
        }
        if least.map_or(true, |(_, s)| score < s) {
            least = Some((node, score));
        }
    }

    (most.map(|(n, _)| n.clone()), least.map(|(n, _)| n.clone()))
}

/// Best transfer target among `candidates`.
///
/// Only active candidates passing every selector and scoring strictly below
/// `exclude_score` qualify; the lowest combined score wins.
pub fn select_leader_node(
    candidates: &[Arc<Node>],
    selectors: &[Box<dyn NodeSelector>],
    exclude_score: f64,
) -> Option<Arc<Node>> {
    let mut best: Option<(&Arc<Node>, f64)> = None;

    for node in candidates {
        let leader_score = node.leader_score();
        if leader_score >= exclude_score || !eligible(node, selectors) {
            continue;
        }
        let score = leader_score + selectors.iter().map(|s| s.score(node)).sum::<f64>();
        if best.map_or(true, |(_, s)| score < s) {
            best = Some((node, score));
        }
    }

    best.map(|(n, _)| n.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rangemaster_core::{NodeState, NodeStats};

    fn node(id: u64, leaders: u64) -> Arc<Node> {
        Arc::new(Node::new(id, format!("n{}", id)).with_stats(NodeStats {
            leader_count: leaders,
            capacity: 100,
            ..Default::default()
        }))
    }

    fn no_selectors() -> Vec<Box<dyn NodeSelector>> {
        Vec::new()
    }

    #[test]
    fn test_writer_ops_threshold() {
        let selector = WriterOpsThresholdSelector::new(100);
        let busy = Node::new(1, "n1").with_stats(NodeStats {
            write_ops: 101,
            ..Default::default()
        });
        let idle = Node::new(2, "n2").with_stats(NodeStats {
            write_ops: 100,
            ..Default::default()
        });
        assert!(!selector.can_select(&busy));
        assert!(selector.can_select(&idle));
    }

    #[test]
    fn test_storage_threshold() {
        let selector = StorageThresholdSelector::new(0.9);
        let full = Node::new(1, "n1").with_stats(NodeStats {
            capacity: 100,
            used_size: 95,
            ..Default::default()
        });
        let roomy = Node::new(2, "n2").with_stats(NodeStats {
            capacity: 100,
            used_size: 50,
            ..Default::default()
        });
        assert!(!selector.can_select(&full));
        assert!(selector.can_select(&roomy));
        // Unknown capacity counts as full
        assert!(!selector.can_select(&Node::new(3, "n3")));
    }

    #[test]
    fn test_nodes_without_capacity_are_never_extremes() {
        let selectors: Vec<Box<dyn NodeSelector>> =
            vec![Box::new(StorageThresholdSelector::new(0.9))];
        let unreported: Vec<_> = (1..=3)
            .map(|id| {
                Arc::new(Node::new(id, format!("n{}", id)).with_stats(NodeStats {
                    leader_count: id * 10,
                    ..Default::default()
                }))
            })
            .collect();

        let (most, least) = select_most_and_least_leader_node(&unreported, &selectors);
        assert!(most.is_none());
        assert!(least.is_none());

        // One node reporting capacity is the only candidate left
        let mut nodes = unreported;
        nodes.push(node(4, 5));
        let (most, least) = select_most_and_least_leader_node(&nodes, &selectors);
        assert_eq!(most.map(|n| n.id()), Some(4));
        assert_eq!(least.map(|n| n.id()), Some(4));
    }

    #[test]
    fn test_inflight_selector() {
        let inflight = InflightNodes::new();
        let selector = InflightNodeSelector::new(inflight.clone());
        let n = node(1, 0);
        assert!(selector.can_select(&n));
        inflight.insert(1);
        assert!(!selector.can_select(&n));
    }

    #[test]
    fn test_most_and_least() {
        let nodes = vec![node(1, 20), node(2, 10), node(3, 5)];
        let (most, least) = select_most_and_least_leader_node(&nodes, &no_selectors());
        assert_eq!(most.unwrap().id(), 1);
        assert_eq!(least.unwrap().id(), 3);
    }

    #[test]
    fn test_most_and_least_ties_keep_first() {
        let nodes = vec![node(1, 7), node(2, 7)];
        let (most, least) = select_most_and_least_leader_node(&nodes, &no_selectors());
        assert_eq!(most.unwrap().id(), 1);
        assert_eq!(least.unwrap().id(), 1);
    }

    #[test]
    fn test_most_and_least_skips_filtered_and_inactive() {
        let nodes = vec![node(1, 20), node(2, 10), node(3, 5)];
        nodes[2].set_state(NodeState::Offline);
        let inflight = InflightNodes::new();
        inflight.insert(1);
        let selectors: Vec<Box<dyn NodeSelector>> =
            vec![Box::new(InflightNodeSelector::new(inflight))];

        let (most, least) = select_most_and_least_leader_node(&nodes, &selectors);
        assert_eq!(most.unwrap().id(), 2);
        assert_eq!(least.unwrap().id(), 2);
    }

    #[test]
    fn test_most_and_least_empty() {
        let (most, least) = select_most_and_least_leader_node(&[], &no_selectors());
        assert!(most.is_none());
        assert!(least.is_none());
    }

    #[test]
    fn test_select_leader_node_lowest_below_exclude() {
        let candidates = vec![node(2, 10), node(3, 5), node(4, 30)];
        let target = select_leader_node(&candidates, &no_selectors(), 20.0);
        assert_eq!(target.unwrap().id(), 3);
    }

    #[test]
    fn test_select_leader_node_exclude_is_strict() {
        let candidates = vec![node(2, 20)];
        assert!(select_leader_node(&candidates, &no_selectors(), 20.0).is_none());
    }

    struct PenaltySelector;

    impl NodeSelector for PenaltySelector {
        fn name(&self) -> &'static str {
            "penalty"
        }

        fn can_select(&self, _node: &Node) -> bool {
            true
        }

        fn score(&self, node: &Node) -> f64 {
            if node.id() == 3 {
                100.0
            } else {
                0.0
            }
        }
    }

    #[test]
    fn test_select_leader_node_adds_selector_scores() {
        let candidates = vec![node(2, 10), node(3, 5)];
        let selectors: Vec<Box<dyn NodeSelector>> = vec![Box::new(PenaltySelector)];
        let target = select_leader_node(&candidates, &selectors, 20.0);
        assert_eq!(target.unwrap().id(), 2);
    }
}
