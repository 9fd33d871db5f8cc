//! Pool statistics and inspection snapshots

use super::cache::BlockCacheStats;
use super::slot::SlotState;
use serde::Serialize;

/// Point-in-time view of one block
#[derive(Debug, Clone, Serialize)]
pub struct BlockSnapshot {
    pub index: u64,
    pub free_slots: usize,
    pub fragmentation_score: u32,
    pub under_reclaim: bool,
    pub slots: Vec<SlotState>,
}

impl BlockSnapshot {
    /// Slots not in the `Free` state
    pub fn occupied_slots(&self) -> usize {
        self.slots.iter().filter(|s| !s.is_free()).count()
    }
}

/// Point-in-time view of one class's block tree
#[derive(Debug, Clone, Serialize)]
pub struct ClassSnapshot {
    pub class: usize,
    pub current_block: Option<u64>,
    pub last_block: Option<u64>,
    pub blocks: Vec<BlockSnapshot>,
}

impl ClassSnapshot {
    pub fn block_indices(&self) -> Vec<u64> {
        self.blocks.iter().map(|b| b.index).collect()
    }

    pub fn block(&self, index: u64) -> Option<&BlockSnapshot> {
        self.blocks.iter().find(|b| b.index == index)
    }

    pub fn is_hot(&self, index: u64) -> bool {
        self.current_block == Some(index) || self.last_block == Some(index)
    }
}

/// Per-class statistics
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ClassStats {
    pub index: usize,
    pub slot_size: usize,
    pub slots_per_block: usize,
    pub units: usize,
    pub blocks: usize,
    pub free_slots: usize,
    pub used_slots: usize,
    pub capacity_bytes: u64,
}

/// Statistics for a whole pool
#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolStats {
    pub classes: Vec<ClassStats>,
    pub total_blocks: usize,
    pub used_slots: usize,
    pub capacity_bytes: u64,
    pub cache: Option<BlockCacheStats>,
}

impl PoolStats {
    /// Share of slot capacity holding live objects
    pub fn utilization(&self) -> f64 {
        let total: usize = self
            .classes
            .iter()
            .map(|c| c.blocks * c.slots_per_block)
            .sum();
        if total > 0 {
            self.used_slots as f64 / total as f64
        } else {
            0.0
        }
    }
}
