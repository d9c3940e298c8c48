//! Operator events emitted by scheduler workers

use rangemaster_core::Peer;
use serde::{Deserialize, Serialize};

/// Move a range's leadership to another replica
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeLeaderEvent {
    /// Cluster-unique operator id
    pub id: u64,
    pub range_id: u64,
    /// Leader at decision time; the transfer is rejected if it has moved
    pub expected_leader: Option<Peer>,
    pub new_leader: Peer,
    /// Name of the worker that made the decision
    pub creator: String,
}

/// Work handed to the operator executor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    TryChangeLeader(ChangeLeaderEvent),
}

impl Event {
    pub fn id(&self) -> u64 {
        match self {
            Event::TryChangeLeader(e) => e.id,
        }
    }

    pub fn range_id(&self) -> u64 {
        match self {
            Event::TryChangeLeader(e) => e.range_id,
        }
    }

    /// Node id held in the in-flight set while this event is pending
    pub fn target_node_id(&self) -> u64 {
        match self {
            Event::TryChangeLeader(e) => e.new_leader.node_id,
        }
    }

    pub fn creator(&self) -> &str {
        match self {
            Event::TryChangeLeader(e) => &e.creator,
        }
    }
}

impl From<ChangeLeaderEvent> for Event {
    fn from(event: ChangeLeaderEvent) -> Self {
        Event::TryChangeLeader(event)
    }
}
