//! Reclaim engine
//!
//! Each pass evicts the unmapped objects of a single block, trying classes
//! from the worst compression to the best since a coarse block gives back
//! more memory per eviction. A class's current and last blocks are never
//! touched.

use super::handle::encode;
use super::pool::Pool;
use super::size_class::CLASS_COUNT;
use crate::metrics;
use serde::Serialize;
use std::fmt;
use tracing::{debug, warn};

/// Outcome of one reclaim pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReclaimResult {
    /// This many objects were evicted
    Reclaimed(usize),
    /// A block was scanned but nothing could be evicted
    Retry,
    /// Every class was empty or held only hot blocks
    NoBlocksEligible,
}

impl ReclaimResult {
    pub fn reclaimed(&self) -> usize {
        match self {
            ReclaimResult::Reclaimed(n) => *n,
            _ => 0,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ReclaimResult::Reclaimed(_) => "reclaimed",
            ReclaimResult::Retry => "retry",
            ReclaimResult::NoBlocksEligible => "no_blocks",
        }
    }
}

impl fmt::Display for ReclaimResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReclaimResult::Reclaimed(n) => write!(f, "reclaimed {} objects", n),
            ReclaimResult::Retry => f.write_str("retry"),
            ReclaimResult::NoBlocksEligible => f.write_str("no eligible blocks"),
        }
    }
}

/// Result of a multi-pass shrink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ShrinkReport {
    /// Objects evicted across all passes
    pub reclaimed: usize,
    /// Pass result that ended the loop, if the target was not reached
    pub stopped_by: Option<ReclaimResult>,
}

impl ShrinkReport {
    pub fn target_met(&self) -> bool {
        self.stopped_by.is_none()
    }
}

impl Pool {
    /// Evict the unmapped objects of one non-hot block
    pub fn reclaim_one_pass(&self) -> ReclaimResult {
        let result = self.reclaim_block();
        if self.config().metrics {
            metrics::RECLAIM_PASSES
                .with_label_values(&[result.label()])
                .inc();
        }
        result
    }

    fn reclaim_block(&self) -> ReclaimResult {
        for class in (0..CLASS_COUNT).rev() {
            let tree = self.tree(class);
            let Some(block) = tree.begin_reclaim() else {
                continue;
            };

            let mut reclaimed = 0;
            for slot in 0..block.slots_per_block() {
                if !block.lock().state(slot).is_evictable() {
                    continue;
                }

                let handle = encode(class, block.index(), slot);
                if let Err(e) = self.evict(handle) {
                    warn!(%handle, error = %e, "Eviction declined, leaving block");
                    if self.config().metrics {
                        metrics::EVICTION_FAILURES
                            .with_label_values(&[&class.to_string()])
                            .inc();
                    }
                    break;
                }

                if !block.lock().release_slot(slot) {
                    continue;
                }
                reclaimed += 1;
                if self.config().metrics {
                    metrics::EVICTIONS
                        .with_label_values(&[&class.to_string()])
                        .inc();
                }
            }

            let index = block.index();
            let destroyed = tree.finish_reclaim(block, self.cache());
            debug!(class, index, reclaimed, destroyed, "Reclaim pass finished");

            return if reclaimed > 0 {
                ReclaimResult::Reclaimed(reclaimed)
            } else {
                ReclaimResult::Retry
            };
        }
        ReclaimResult::NoBlocksEligible
    }

    /// Reclaim until `target` objects are evicted or a pass makes no progress
    pub fn shrink(&self, target: usize) -> ShrinkReport {
        let mut report = ShrinkReport {
            reclaimed: 0,
            stopped_by: None,
        };
        while report.reclaimed < target {
            match self.reclaim_one_pass() {
                ReclaimResult::Reclaimed(n) => report.reclaimed += n,
                other => {
                    report.stopped_by = Some(other);
                    break;
                }
            }
        }
        debug!(target, reclaimed = report.reclaimed, "Shrink finished");
        report
    }
}
