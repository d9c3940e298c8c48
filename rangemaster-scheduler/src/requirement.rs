//! Range eligibility for scheduling
//!
//! Balancers only touch ranges the requirement accepts. The default check is
//! conservative; deployments with richer health data can inject their own.

use rangemaster_core::Range;

use crate::cluster::Cluster;

/// Decides whether a range may be scheduled right now
pub trait RangeRequirement: Send + Sync {
    fn require(&self, range: &Range, cluster: &Cluster) -> bool;
}

/// Accepts healthy, recently heartbeating ranges led from an active node
#[derive(Debug, Default, Clone, Copy)]
pub struct HealthyRangeRequirement;

impl RangeRequirement for HealthyRangeRequirement {
    fn require(&self, range: &Range, cluster: &Cluster) -> bool {
        if !range.is_healthy() {
            return false;
        }
        if range.heartbeat_age() > cluster.option().max_range_heartbeat_age {
            return false;
        }
        match range.leader() {
            Some(leader) => cluster
                .find_node(leader.node_id)
                .is_some_and(|node| node.is_active()),
            None => false,
        }
    }
}
