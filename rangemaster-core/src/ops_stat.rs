//! Lock-free recent write-rate statistic
//!
//! A fixed ring of slots indexed by a monotonically increasing hit counter.
//! `max()` approximates the recent peak: values age out only when a later
//! hit overwrites their slot, so this is not a true sliding window.

use std::sync::atomic::{AtomicU64, Ordering};

/// Number of slots in the ring
pub const OPS_STAT_CAPACITY: usize = 16;

/// Ring buffer of recent write-operation counts
#[derive(Debug)]
pub struct RangeOpsStat {
    write_ops: [AtomicU64; OPS_STAT_CAPACITY],
    hit: AtomicU64,
}

impl Default for RangeOpsStat {
    fn default() -> Self {
        Self::new()
    }
}

impl RangeOpsStat {
    pub fn new() -> Self {
        Self {
            write_ops: std::array::from_fn(|_| AtomicU64::new(0)),
            hit: AtomicU64::new(0),
        }
    }

    /// Record a sample.
    ///
    /// Two writers that land on the same slot may store out of order; the
    /// statistic tolerates that.
    pub fn hit(&self, v: u64) {
        let hit = self.hit.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        let slot = (hit % OPS_STAT_CAPACITY as u64) as usize;
        self.write_ops[slot].store(v, Ordering::Relaxed);
    }

    /// Largest sample still held in the ring
    pub fn max(&self) -> u64 {
        self.write_ops
            .iter()
            .map(|slot| slot.load(Ordering::Relaxed))
            .max()
            .unwrap_or(0)
    }

    /// Zero every slot. The hit counter keeps counting.
    pub fn clear(&self) {
        for slot in &self.write_ops {
            slot.store(0, Ordering::Relaxed);
        }
    }

    /// Total number of samples recorded
    pub fn hits(&self) -> u64 {
        self.hit.load(Ordering::Relaxed)
    }
}
