//! Slot states

use serde::{Deserialize, Serialize};
use std::fmt;

/// State of one slot within a block
///
/// `Free → Occupied → Mapped ⇄ Unmapped`; any state may be freed,
/// and only `Unmapped` slots are eviction candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[repr(u8)]
pub enum SlotState {
    /// Not handed out
    #[default]
    Free = 0,
    /// Allocated, never mapped since
    Occupied = 1,
    /// Being read or written by the client
    Mapped = 2,
    /// Mapped at least once, now released
    Unmapped = 3,
}

impl SlotState {
    pub fn is_free(self) -> bool {
        self == SlotState::Free
    }

    /// Whether reclaim may evict a slot in this state
    pub fn is_evictable(self) -> bool {
        self == SlotState::Unmapped
    }
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SlotState::Free => "free",
            SlotState::Occupied => "occupied",
            SlotState::Mapped => "mapped",
            SlotState::Unmapped => "unmapped",
        };
        f.write_str(name)
    }
}
