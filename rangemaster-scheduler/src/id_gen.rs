//! Cluster-wide id allocation
//!
//! Operator ids must be unique across the cluster and never decrease. The
//! persistent allocator lives outside the scheduler; this module defines the
//! seam plus an in-process generator.

use std::sync::atomic::{AtomicU64, Ordering};

use rangemaster_core::{RangeMasterError, Result};

/// Source of unique, monotonically non-decreasing ids
pub trait IdGenerator: Send + Sync {
    fn gen_id(&self) -> Result<u64>;
}

/// In-memory generator starting at a seed
#[derive(Debug)]
pub struct AtomicIdGenerator {
    next: AtomicU64,
}

impl AtomicIdGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            next: AtomicU64::new(seed),
        }
    }
}

impl Default for AtomicIdGenerator {
    fn default() -> Self {
        Self::new(1)
    }
}

impl IdGenerator for AtomicIdGenerator {
    fn gen_id(&self) -> Result<u64> {
        self.next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |id| id.checked_add(1))
            .map_err(|_| RangeMasterError::IdExhausted)
    }
}
