//! Leader balancing
//!
//! Each cycle compares the busiest and idlest eligible nodes against the
//! mean leader count and, when either is more than
//! [`MIN_LEADER_BALANCE_NUM`] away from it, emits a single leadership
//! transfer. The worker keeps no state between cycles; the shared in-flight
//! set is what stops two cycles from piling onto the same target.

use std::sync::Arc;
use std::time::Duration;

use rangemaster_core::{Node, Peer};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::cluster::Cluster;
use crate::event::ChangeLeaderEvent;
use crate::metrics::labels;
use crate::selector::{
    select_leader_node, select_most_and_least_leader_node, InflightNodeSelector, NodeSelector,
    StorageThresholdSelector, WriterOpsThresholdSelector,
};
use crate::worker::Worker;

/// Minimum distance from the mean before leadership is moved
pub const MIN_LEADER_BALANCE_NUM: u64 = 5;

pub const BALANCE_LEADER_WORKER_NAME: &str = "balance_leader_worker";

/// A chosen leadership move
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderDecision {
    pub range_id: u64,
    /// Leader when the decision was made
    pub leader: Option<Peer>,
    /// Replica that should become leader
    pub target: Peer,
}

/// Mean leader score over `nodes`, 0 when empty
pub fn count_leader_avg(nodes: &[Arc<Node>]) -> f64 {
    if nodes.is_empty() {
        return 0.0;
    }
    let total: f64 = nodes.iter().map(|n| n.leader_score()).sum();
    total / nodes.len() as f64
}

fn leader_selectors(cluster: &Cluster) -> Vec<Box<dyn NodeSelector>> {
    let option = cluster.option();
    vec![
        Box::new(WriterOpsThresholdSelector::new(option.max_node_write_ops)),
        Box::new(StorageThresholdSelector::new(option.max_storage_used_ratio)),
        Box::new(InflightNodeSelector::new(cluster.inflight_nodes().clone())),
    ]
}

/// Pick at most one leadership move for the current cluster state
pub fn select_change_leader(cluster: &Cluster, worker_name: &str) -> Option<LeaderDecision> {
    let nodes = cluster.active_nodes();
    if nodes.is_empty() {
        cluster
            .metric()
            .collect_schedule_counter(worker_name, labels::NO_NODE);
        debug!(worker = worker_name, "No active node");
        return None;
    }

    let selectors = leader_selectors(cluster);
    // Mean covers every active node, selection only the filtered ones
    let avg = count_leader_avg(&nodes);
    let (most, least) = select_most_and_least_leader_node(&nodes, &selectors);
    let most_score = most.as_ref().map_or(0.0, |n| n.leader_score());
    let least_score = least.as_ref().map_or(0.0, |n| n.leader_score());
    let threshold = MIN_LEADER_BALANCE_NUM as f64;

    debug!(
        worker = worker_name,
        avg,
        most = ?most.as_ref().map(|n| n.id()),
        most_score,
        least = ?least.as_ref().map(|n| n.id()),
        least_score,
        "Leader distribution"
    );

    if let Some(most) = most.filter(|_| most_score - avg > threshold) {
        if let Some(decision) = shed_leader(cluster, &most, most_score, &selectors) {
            return Some(decision);
        }
    }

    if let Some(least) = least.filter(|_| avg - least_score > threshold) {
        if let Some(decision) = take_leader(cluster, &least) {
            return Some(decision);
        }
    }

    None
}

/// Move one leadership off an overloaded node to its least loaded follower
fn shed_leader(
    cluster: &Cluster,
    most: &Node,
    most_score: f64,
    selectors: &[Box<dyn NodeSelector>],
) -> Option<LeaderDecision> {
    for range in most.all_ranges() {
        let range = range.read();
        let Some(leader) = range.leader() else {
            continue;
        };
        if leader.node_id != most.id() || !cluster.require(&range) {
            continue;
        }

        let followers = cluster.follower_nodes(&range);
        let Some(target) = select_leader_node(&followers, selectors, most_score) else {
            continue;
        };
        if let Some(peer) = range.node_peer(target.id()) {
            return Some(LeaderDecision {
                range_id: range.id(),
                leader: Some(leader),
                target: peer,
            });
        }
    }
    None
}

/// Move one leadership onto an underloaded node from a busier leader
fn take_leader(cluster: &Cluster, least: &Node) -> Option<LeaderDecision> {
    let least_count = least.leader_count();

    for range in least.all_ranges() {
        let range = range.read();
        let Some(leader) = range.leader() else {
            continue;
        };
        if leader.node_id == least.id() || !cluster.require(&range) {
            continue;
        }

        let Some(leader_node) = cluster.leader_node(&range) else {
            continue;
        };
        let gap = leader_node.leader_count().checked_sub(least_count);
        if !gap.is_some_and(|g| g > MIN_LEADER_BALANCE_NUM) {
            continue;
        }

        if let Some(peer) = range.node_peer(least.id()) {
            return Some(LeaderDecision {
                range_id: range.id(),
                leader: Some(leader),
                target: peer,
            });
        }
    }
    None
}

/// Periodically evens out leader counts across nodes
pub struct BalanceNodeLeaderWorker {
    name: String,
    interval: Duration,
    token: CancellationToken,
}

impl BalanceNodeLeaderWorker {
    /// `parent` is usually the worker manager's root token
    pub fn new(interval: Duration, parent: &CancellationToken) -> Self {
        Self {
            name: BALANCE_LEADER_WORKER_NAME.to_string(),
            interval,
            token: parent.child_token(),
        }
    }
}

impl Worker for BalanceNodeLeaderWorker {
    fn name(&self) -> &str {
        &self.name
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    #[instrument(skip_all, fields(worker = %self.name))]
    fn work(&self, cluster: &Cluster) {
        let Some(decision) = select_change_leader(cluster, &self.name) else {
            return;
        };

        let id = match cluster.gen_id() {
            Ok(id) => id,
            Err(e) => {
                warn!(range_id = decision.range_id, error = %e, "Failed to allocate operator id");
                return;
            }
        };

        let target_node = decision.target.node_id;
        if !cluster.inflight_nodes().insert(target_node) {
            debug!(node_id = target_node, "Target node already has an operator in flight");
            return;
        }

        cluster
            .metric()
            .collect_schedule_counter(&self.name, labels::NEW_OPERATOR);

        info!(
            operator_id = id,
            range_id = decision.range_id,
            from = ?decision.leader,
            to = ?decision.target,
            "Transfer leader"
        );

        let event = ChangeLeaderEvent {
            id,
            range_id: decision.range_id,
            expected_leader: decision.leader,
            new_leader: decision.target,
            creator: self.name.clone(),
        };
        if let Err(e) = cluster.push_event(event) {
            cluster.inflight_nodes().remove(target_node);
            warn!(operator_id = id, error = %e, "Failed to dispatch operator");
        }
    }

    fn allow_work(&self, cluster: &Cluster) -> bool {
        !cluster.auto_failover_unable()
    }

    fn stop(&self) {
        self.token.cancel();
    }

    fn cancellation(&self) -> CancellationToken {
        self.token.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScheduleOption;
    use crate::dispatcher::{EventDispatcher, EventReceiver};
    use crate::event::Event;
    use crate::id_gen::IdGenerator;
    use crate::metrics::MemoryCollector;
    use proptest::prelude::*;
    use rangemaster_core::{NodeStats, Range, RangeMasterError, RangeMeta};

    struct Harness {
        cluster: Cluster,
        metric: Arc<MemoryCollector>,
        rx: EventReceiver,
    }

    fn harness(leader_counts: &[u64]) -> Harness {
        let (dispatcher, rx) = EventDispatcher::channel(16);
        let metric = Arc::new(MemoryCollector::new());
        let cluster =
            Cluster::new(ScheduleOption::default(), dispatcher).with_metrics(metric.clone());
        for (i, count) in leader_counts.iter().enumerate() {
            let id = i as u64 + 1;
            cluster.add_node(Node::new(id, format!("n{}", id)).with_stats(NodeStats {
                leader_count: *count,
                capacity: 100,
                used_size: 10,
                ..Default::default()
            }));
        }
        Harness {
            cluster,
            metric,
            rx,
        }
    }

    /// Range `id` with one replica per node in `nodes`, led by the first
    fn add_range(cluster: &Cluster, id: u64, nodes: &[u64]) {
        let peers = nodes.iter().map(|n| Peer::new(id * 10 + n, *n)).collect();
        cluster.add_range(Range::new(RangeMeta::new(id, 1, peers), None).unwrap());
    }

    fn worker() -> BalanceNodeLeaderWorker {
        BalanceNodeLeaderWorker::new(Duration::from_secs(60), &CancellationToken::new())
    }

    fn change_leader(event: Event) -> ChangeLeaderEvent {
        match event {
            Event::TryChangeLeader(e) => e,
        }
    }

    #[test]
    fn test_count_leader_avg() {
        let h = harness(&[20, 10, 5]);
        let avg = count_leader_avg(&h.cluster.active_nodes());
        assert!((avg - 35.0 / 3.0).abs() < 1e-9);
        assert_eq!(count_leader_avg(&[]), 0.0);
    }

    #[test]
    fn test_overloaded_branch_fires() {
        let h = harness(&[20, 10, 5]);
        add_range(&h.cluster, 1, &[1, 2, 3]);

        let decision = select_change_leader(&h.cluster, "test").unwrap();
        assert_eq!(decision.range_id, 1);
        assert_eq!(decision.leader, Some(Peer::new(11, 1)));
        // Least loaded follower wins
        assert_eq!(decision.target, Peer::new(13, 3));
    }

    #[test]
    fn test_balanced_cluster_no_decision() {
        let h = harness(&[8, 7, 6]);
        add_range(&h.cluster, 1, &[1, 2, 3]);
        add_range(&h.cluster, 2, &[2, 3, 1]);

        assert!(select_change_leader(&h.cluster, "test").is_none());
        worker().work(&h.cluster);
        assert_eq!(h.metric.total(labels::NEW_OPERATOR), 0);
        assert!(h.cluster.inflight_nodes().is_empty());
    }

    #[test]
    fn test_underloaded_branch_fires() {
        // avg 8.75; most 12 is within threshold, least 0 is not
        let h = harness(&[12, 12, 11, 0]);
        add_range(&h.cluster, 1, &[1, 4]);

        let decision = select_change_leader(&h.cluster, "test").unwrap();
        assert_eq!(decision.range_id, 1);
        assert_eq!(decision.leader, Some(Peer::new(11, 1)));
        assert_eq!(decision.target, Peer::new(14, 4));
    }

    #[test]
    fn test_underloaded_branch_needs_busier_leader() {
        // Leader node 3 has only 4 more leaders than node 4
        let h = harness(&[14, 14, 4, 0]);
        add_range(&h.cluster, 1, &[3, 4]);

        assert!(select_change_leader(&h.cluster, "test").is_none());
    }

    #[test]
    fn test_overloaded_skips_ranges_it_does_not_lead() {
        let h = harness(&[20, 10, 5]);
        add_range(&h.cluster, 1, &[2, 1]);
        add_range(&h.cluster, 2, &[1, 3]);

        let decision = select_change_leader(&h.cluster, "test").unwrap();
        assert_eq!(decision.range_id, 2);
    }

    #[test]
    fn test_overloaded_skips_unrequired_range() {
        let h = harness(&[20, 10, 5]);
        add_range(&h.cluster, 1, &[1, 3]);
        h.cluster
            .find_range(1)
            .unwrap()
            .write()
            .set_pending_peers(vec![Peer::new(13, 3)])
            .unwrap();

        assert!(select_change_leader(&h.cluster, "test").is_none());
    }

    #[test]
    fn test_work_emits_event_and_marks_target() {
        let mut h = harness(&[20, 10, 5]);
        add_range(&h.cluster, 7, &[1, 2, 3]);

        worker().work(&h.cluster);

        let event = change_leader(h.rx.try_recv().unwrap());
        assert_eq!(event.range_id, 7);
        assert_eq!(event.expected_leader, Some(Peer::new(71, 1)));
        assert_eq!(event.new_leader, Peer::new(73, 3));
        assert_eq!(event.creator, BALANCE_LEADER_WORKER_NAME);

        assert_eq!(h.cluster.inflight_nodes().snapshot(), vec![3]);
        assert_eq!(
            h.metric.get(BALANCE_LEADER_WORKER_NAME, labels::NEW_OPERATOR),
            1
        );
        assert!(h.rx.try_recv().is_none());
    }

    #[test]
    fn test_inflight_target_excluded() {
        let mut h = harness(&[20, 10, 5]);
        add_range(&h.cluster, 1, &[1, 3]);
        h.cluster.inflight_nodes().insert(3);

        worker().work(&h.cluster);
        assert!(h.rx.try_recv().is_none());
        assert_eq!(h.metric.total(labels::NEW_OPERATOR), 0);
    }

    #[test]
    fn test_second_cycle_does_not_retarget() {
        let mut h = harness(&[20, 10, 5]);
        add_range(&h.cluster, 1, &[1, 3]);
        add_range(&h.cluster, 2, &[1, 3]);

        let w = worker();
        w.work(&h.cluster);
        w.work(&h.cluster);

        assert!(h.rx.try_recv().is_some());
        assert!(h.rx.try_recv().is_none());
        assert_eq!(h.metric.total(labels::NEW_OPERATOR), 1);
    }

    #[test]
    fn test_no_node_metric() {
        let h = harness(&[]);
        worker().work(&h.cluster);
        assert_eq!(
            h.metric.get(BALANCE_LEADER_WORKER_NAME, labels::NO_NODE),
            1
        );
    }

    #[test]
    fn test_allow_work_gate() {
        let h = harness(&[20, 10, 5]);
        let w = worker();
        assert!(w.allow_work(&h.cluster));
        h.cluster.set_auto_failover_unable(true);
        assert!(!w.allow_work(&h.cluster));
    }

    struct FailingIds;

    impl IdGenerator for FailingIds {
        fn gen_id(&self) -> rangemaster_core::Result<u64> {
            Err(RangeMasterError::IdAllocation("unavailable".to_string()))
        }
    }

    #[test]
    fn test_id_failure_ends_cycle() {
        let (dispatcher, mut rx) = EventDispatcher::channel(4);
        let cluster = Cluster::new(ScheduleOption::default(), dispatcher)
            .with_id_generator(Arc::new(FailingIds));
        for (id, count) in [(1, 20), (2, 10), (3, 5)] {
            cluster.add_node(Node::new(id, "n").with_stats(NodeStats {
                leader_count: count,
                capacity: 100,
                ..Default::default()
            }));
        }
        add_range(&cluster, 1, &[1, 3]);

        worker().work(&cluster);
        assert!(rx.try_recv().is_none());
        assert!(cluster.inflight_nodes().is_empty());
    }

    #[test]
    fn test_dispatch_failure_releases_target() {
        let (dispatcher, rx) = EventDispatcher::channel(4);
        drop(rx);
        let cluster = Cluster::new(ScheduleOption::default(), dispatcher)
            .with_metrics(Arc::new(MemoryCollector::new()));
        for (id, count) in [(1, 20), (2, 10), (3, 5)] {
            cluster.add_node(Node::new(id, "n").with_stats(NodeStats {
                leader_count: count,
                capacity: 100,
                ..Default::default()
            }));
        }
        add_range(&cluster, 1, &[1, 3]);

        worker().work(&cluster);
        assert!(cluster.inflight_nodes().is_empty());
    }

    #[test]
    fn test_stop_cancels_child_only() {
        let parent = CancellationToken::new();
        let w = BalanceNodeLeaderWorker::new(Duration::from_secs(1), &parent);
        w.stop();
        assert!(w.cancellation().is_cancelled());
        assert!(!parent.is_cancelled());
    }

    proptest! {
        #[test]
        fn prop_avg_is_mean(counts in proptest::collection::vec(0u64..10_000, 1..32)) {
            let nodes: Vec<_> = counts
                .iter()
                .enumerate()
                .map(|(i, c)| {
                    Arc::new(Node::new(i as u64, "n").with_stats(NodeStats {
                        leader_count: *c,
                        ..Default::default()
                    }))
                })
                .collect();
            let expected = counts.iter().sum::<u64>() as f64 / counts.len() as f64;
            prop_assert!((count_leader_avg(&nodes) - expected).abs() < 1e-6);
        }
    }
}
