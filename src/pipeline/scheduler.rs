//! Optimize scheduling for the disk indexer.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};

/// What kind of maintenance should follow a disk drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizeKind {
    /// No maintenance.
    None,

    /// Rewrite segments carrying tombstones.
    ExpungeDeletes,

    /// Merge everything down to a single segment.
    FullMerge,
}

/// Decides when the disk indexer should run maintenance after a drain.
pub trait OptimizeScheduler: Send + Sync + Debug {
    /// Maintenance to perform after the drain that is about to finish.
    fn scheduled_optimize(&self) -> OptimizeKind;

    /// Called once the drain, including any maintenance, is done.
    fn finished(&self);
}

/// Never schedules maintenance.
#[derive(Debug, Default)]
pub struct NullOptimizeScheduler;

impl OptimizeScheduler for NullOptimizeScheduler {
    fn scheduled_optimize(&self) -> OptimizeKind {
        OptimizeKind::None
    }

    fn finished(&self) {}
}

/// Expunges deletes every N drains.
#[derive(Debug)]
pub struct PeriodicOptimizeScheduler {
    every: u64,
    drains: AtomicU64,
}

impl PeriodicOptimizeScheduler {
    /// Schedule an expunge after every `every` drains.
    pub fn new(every: u64) -> Self {
        PeriodicOptimizeScheduler {
            every: every.max(1),
            drains: AtomicU64::new(0),
        }
    }
}

impl OptimizeScheduler for PeriodicOptimizeScheduler {
    fn scheduled_optimize(&self) -> OptimizeKind {
        let drains = self.drains.fetch_add(1, Ordering::AcqRel) + 1;
        if drains % self.every == 0 {
            OptimizeKind::ExpungeDeletes
        } else {
            OptimizeKind::None
        }
    }

    fn finished(&self) {}
}
