//! Scheduler-side view of a range
//!
//! A [`Range`] wraps the shard identity record ([`RangeMeta`]) and adds the
//! fields the scheduler cares about: current leader, down/pending peers,
//! read/write counters, lifecycle state and heartbeat time.
//!
//! Shared ranges live behind their own reader/writer lock ([`RangeRef`]) so
//! heartbeat ingestion and scheduler reads do not contend on a global lock.
//!
//! Nil-safe access: callers holding an `Option<&Range>` can read it through
//! [`RangeAccess`] without checking for `None` first; every accessor degrades
//! to its zero value.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::seq::IteratorRandom;
use serde::{Deserialize, Serialize};

use crate::error::{RangeMasterError, Result};
use crate::ops_stat::RangeOpsStat;
use crate::peer::{Peer, PeerStats, RangeEpoch, RangeMeta};

/// A range shared between heartbeat ingestion and the scheduler
pub type RangeRef = Arc<RwLock<Range>>;

/// Peer status list shared between a range and its clones
type SharedList<T> = Arc<RwLock<Vec<T>>>;

/// Range lifecycle state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RangeState {
    Init,
    #[default]
    Normal,
    Split,
    Merge,
    /// Marked for removal from the cluster
    Remove,
    LoadSnap,
    Abnormal,
    Offline,
}

/// A shard and its scheduling state
#[derive(Debug)]
pub struct Range {
    meta: RangeMeta,
    leader: Option<Peer>,
    down_peers: SharedList<PeerStats>,
    pending_peers: SharedList<Peer>,

    pub bytes_written: u64,
    pub bytes_read: u64,
    pub keys_written: u64,
    pub keys_read: u64,
    /// Approximate range size in bytes
    pub approximate_size: u64,

    pub state: RangeState,
    pub trace: bool,
    pub last_hb_time: DateTime<Utc>,

    ops_stat: RangeOpsStat,
}

impl Range {
    /// Register a range.
    ///
    /// With no reported leader the first replica is assumed to lead.
    pub fn new(meta: RangeMeta, leader: Option<Peer>) -> Result<Self> {
        let leader = match leader {
            Some(peer) => {
                if !meta.has_peer(peer.id) {
                    return Err(RangeMasterError::InvalidPeer {
                        range_id: meta.id,
                        peer_id: peer.id,
                    });
                }
                Some(peer)
            }
            None => meta.peers.first().copied(),
        };

        Ok(Self {
            meta,
            leader,
            down_peers: Arc::new(RwLock::new(Vec::new())),
            pending_peers: Arc::new(RwLock::new(Vec::new())),
            bytes_written: 0,
            bytes_read: 0,
            keys_written: 0,
            keys_read: 0,
            approximate_size: 0,
            state: RangeState::Normal,
            trace: false,
            last_hb_time: Utc::now(),
            ops_stat: RangeOpsStat::new(),
        })
    }

    /// Wrap into a lockable shared handle
    pub fn into_ref(self) -> RangeRef {
        Arc::new(RwLock::new(self))
    }

    // ===== Identity =====

    pub fn meta(&self) -> &RangeMeta {
        &self.meta
    }

    pub fn id(&self) -> u64 {
        self.meta.id
    }

    pub fn table_id(&self) -> u64 {
        self.meta.table_id
    }

    pub fn start_key(&self) -> &[u8] {
        &self.meta.start_key
    }

    pub fn end_key(&self) -> &[u8] {
        &self.meta.end_key
    }

    pub fn epoch(&self) -> RangeEpoch {
        self.meta.epoch
    }

    /// `table:range` label used in logs
    pub fn key_string(&self) -> String {
        format!("{}:{}", self.meta.table_id, self.meta.id)
    }

    // ===== Membership =====

    pub fn peers(&self) -> &[Peer] {
        &self.meta.peers
    }

    pub fn leader(&self) -> Option<Peer> {
        self.leader
    }

    /// Update the leader. The new leader must be in the replica set.
    pub fn set_leader(&mut self, leader: Option<Peer>) -> Result<()> {
        if let Some(peer) = leader {
            self.check_member(peer.id)?;
        }
        self.leader = leader;
        Ok(())
    }

    /// Peer with the given peer id
    pub fn peer(&self, peer_id: u64) -> Option<Peer> {
        self.meta.peers.iter().find(|p| p.id == peer_id).copied()
    }

    /// Peer hosted on the given node
    pub fn node_peer(&self, node_id: u64) -> Option<Peer> {
        self.meta.peers.iter().find(|p| p.node_id == node_id).copied()
    }

    /// Drop every replica hosted on `node_id`.
    ///
    /// Needs `&mut self`, i.e. the caller holds the range write lock.
    pub fn remove_node_peer(&mut self, node_id: u64) {
        self.meta.peers.retain(|p| p.node_id != node_id);

        if self.leader.is_some_and(|l| l.node_id == node_id) {
            self.leader = None;
        }

        // Replace rather than edit so clones keep the list they were given.
        let down: Vec<_> = self
            .down_peers
            .read()
            .iter()
            .filter(|s| s.peer.node_id != node_id)
            .cloned()
            .collect();
        let pending: Vec<_> = self
            .pending_peers
            .read()
            .iter()
            .filter(|p| p.node_id != node_id)
            .copied()
            .collect();
        self.down_peers = Arc::new(RwLock::new(down));
        self.pending_peers = Arc::new(RwLock::new(pending));
    }

    /// Node ids hosting a replica
    pub fn node_ids(&self) -> HashSet<u64> {
        self.meta.peers.iter().map(|p| p.node_id).collect()
    }

    /// Non-leader replicas keyed by node id
    pub fn followers(&self) -> HashMap<u64, Peer> {
        self.meta
            .peers
            .iter()
            .filter(|p| !self.is_leader_peer(p))
            .map(|p| (p.node_id, *p))
            .collect()
    }

    /// Any non-leader replica
    pub fn random_follower(&self) -> Option<Peer> {
        self.meta
            .peers
            .iter()
            .filter(|p| !self.is_leader_peer(p))
            .choose(&mut rand::thread_rng())
            .copied()
    }

    fn is_leader_peer(&self, peer: &Peer) -> bool {
        self.leader.is_some_and(|l| l.id == peer.id)
    }

    fn check_member(&self, peer_id: u64) -> Result<()> {
        if self.meta.has_peer(peer_id) {
            Ok(())
        } else {
            Err(RangeMasterError::InvalidPeer {
                range_id: self.meta.id,
                peer_id,
            })
        }
    }

    // ===== Peer status =====

    pub fn down_peer(&self, peer_id: u64) -> Option<Peer> {
        self.down_peers
            .read()
            .iter()
            .find(|s| s.peer.id == peer_id)
            .map(|s| s.peer)
    }

    pub fn down_peers(&self) -> Vec<Peer> {
        self.down_peers.read().iter().map(|s| s.peer).collect()
    }

    /// Handle to the down-peer list. Shared with every clone of this range.
    pub fn down_peer_stats(&self) -> Arc<RwLock<Vec<PeerStats>>> {
        self.down_peers.clone()
    }

    /// Replace the down-peer list. Every entry must be a member.
    pub fn set_down_peers(&mut self, down: Vec<PeerStats>) -> Result<()> {
        for stats in &down {
            self.check_member(stats.peer.id)?;
        }
        self.down_peers = Arc::new(RwLock::new(down));
        Ok(())
    }

    pub fn pending_peer(&self, peer_id: u64) -> Option<Peer> {
        self.pending_peers
            .read()
            .iter()
            .find(|p| p.id == peer_id)
            .copied()
    }

    pub fn pending_peers(&self) -> Vec<Peer> {
        self.pending_peers.read().clone()
    }

    /// Handle to the pending-peer list. Shared with every clone of this range.
    pub fn pending_peer_list(&self) -> Arc<RwLock<Vec<Peer>>> {
        self.pending_peers.clone()
    }

    /// Replace the pending-peer list. Every entry must be a member.
    pub fn set_pending_peers(&mut self, pending: Vec<Peer>) -> Result<()> {
        for peer in &pending {
            self.check_member(peer.id)?;
        }
        self.pending_peers = Arc::new(RwLock::new(pending));
        Ok(())
    }

    // ===== Health and load =====

    /// No down peers, no pending peers, and not being removed
    pub fn is_healthy(&self) -> bool {
        self.down_peers.read().is_empty()
            && self.pending_peers.read().is_empty()
            && self.state != RangeState::Remove
    }

    pub fn set_state(&mut self, state: RangeState) {
        self.state = state;
    }

    pub fn ops_stat(&self) -> &RangeOpsStat {
        &self.ops_stat
    }

    pub fn touch_heartbeat(&mut self) {
        self.last_hb_time = Utc::now();
    }

    /// Time since the last heartbeat; zero if the clock went backwards
    pub fn heartbeat_age(&self) -> Duration {
        (Utc::now() - self.last_hb_time)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    // ===== Copies =====

    /// Copy for reading outside the lock.
    ///
    /// The identity record and scalar fields are copied. The down/pending
    /// peer lists are shared with `self`: treat them as read-only on the
    /// copy, since writes through either side are visible to both. The write
    /// statistic starts empty.
    pub fn clone_range(&self) -> Range {
        Range {
            meta: self.meta.clone(),
            leader: self.leader,
            down_peers: self.down_peers.clone(),
            pending_peers: self.pending_peers.clone(),
            ..self.clone_scalars()
        }
    }

    /// Like [`clone_range`](Self::clone_range) but the peer status lists are
    /// copied too, so the result shares nothing with `self`.
    pub fn clone_detached(&self) -> Range {
        Range {
            meta: self.meta.clone(),
            leader: self.leader,
            down_peers: Arc::new(RwLock::new(self.down_peers.read().clone())),
            pending_peers: Arc::new(RwLock::new(self.pending_peers.read().clone())),
            ..self.clone_scalars()
        }
    }

    fn clone_scalars(&self) -> Range {
        Range {
            meta: RangeMeta::default(),
            leader: None,
            down_peers: Arc::default(),
            pending_peers: Arc::default(),
            bytes_written: self.bytes_written,
            bytes_read: self.bytes_read,
            keys_written: self.keys_written,
            keys_read: self.keys_read,
            approximate_size: self.approximate_size,
            state: self.state,
            trace: self.trace,
            last_hb_time: self.last_hb_time,
            ops_stat: RangeOpsStat::new(),
        }
    }
}

/// Nil-safe read access for an optional range
pub trait RangeAccess {
    fn id(&self) -> u64;
    fn table_id(&self) -> u64;
    fn key_string(&self) -> String;
    fn leader(&self) -> Option<Peer>;
    fn peers(&self) -> Vec<Peer>;
    fn peer(&self, peer_id: u64) -> Option<Peer>;
    fn node_peer(&self, node_id: u64) -> Option<Peer>;
    fn down_peer(&self, peer_id: u64) -> Option<Peer>;
    fn down_peers(&self) -> Vec<Peer>;
    fn pending_peer(&self, peer_id: u64) -> Option<Peer>;
    fn pending_peers(&self) -> Vec<Peer>;
    fn node_ids(&self) -> HashSet<u64>;
    fn followers(&self) -> HashMap<u64, Peer>;
    fn random_follower(&self) -> Option<Peer>;
    fn is_healthy(&self) -> bool;
}

impl RangeAccess for Option<&Range> {
    fn id(&self) -> u64 {
        self.map_or(0, |r| r.id())
    }

    fn table_id(&self) -> u64 {
        self.map_or(0, |r| r.table_id())
    }

    fn key_string(&self) -> String {
        self.map(|r| r.key_string()).unwrap_or_default()
    }

    fn leader(&self) -> Option<Peer> {
        self.and_then(|r| r.leader())
    }

    fn peers(&self) -> Vec<Peer> {
        self.map(|r| r.peers().to_vec()).unwrap_or_default()
    }

    fn peer(&self, peer_id: u64) -> Option<Peer> {
        self.and_then(|r| r.peer(peer_id))
    }

    fn node_peer(&self, node_id: u64) -> Option<Peer> {
        self.and_then(|r| r.node_peer(node_id))
    }

    fn down_peer(&self, peer_id: u64) -> Option<Peer> {
        self.and_then(|r| r.down_peer(peer_id))
    }

    fn down_peers(&self) -> Vec<Peer> {
        self.map(|r| r.down_peers()).unwrap_or_default()
    }

    fn pending_peer(&self, peer_id: u64) -> Option<Peer> {
        self.and_then(|r| r.pending_peer(peer_id))
    }

    fn pending_peers(&self) -> Vec<Peer> {
        self.map(|r| r.pending_peers()).unwrap_or_default()
    }

    fn node_ids(&self) -> HashSet<u64> {
        self.map(|r| r.node_ids()).unwrap_or_default()
    }

    fn followers(&self) -> HashMap<u64, Peer> {
        self.map(|r| r.followers()).unwrap_or_default()
    }

    fn random_follower(&self) -> Option<Peer> {
        self.and_then(|r| r.random_follower())
    }

    fn is_healthy(&self) -> bool {
        self.is_some_and(|r| r.is_healthy())
    }
}
