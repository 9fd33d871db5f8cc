//! Handle codec
//!
//! A handle packs `(class, block_index, slot)` into one `u64`:
//!
//! ```text
//!  63    60 59                          4 3     0
//! [ class  |        block index          | slot ]
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Bits reserved for the slot index
pub const SLOT_BITS: u32 = 4;

/// Bits reserved for the size class
pub const CLASS_BITS: u32 = 4;

/// Shift of the class field
pub const HIGH_SHIFT: u32 = u64::BITS - CLASS_BITS;

/// Block indices wrap at this bound
pub const MAX_BLOCK_INDEX: u64 = u64::MAX >> (SLOT_BITS + CLASS_BITS);

const BLOCK_INDEX_MASK: u64 = MAX_BLOCK_INDEX << SLOT_BITS;
const SLOT_MASK: u64 = (1 << SLOT_BITS) - 1;

/// Opaque locator of one slot in a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Handle(u64);

impl Handle {
    /// Rebuild a handle from its raw value
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw integer value
    pub const fn into_raw(self) -> u64 {
        self.0
    }

    pub fn class(&self) -> usize {
        decode(*self).0
    }

    pub fn block_index(&self) -> u64 {
        decode(*self).1
    }

    pub fn slot(&self) -> usize {
        decode(*self).2
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (class, block_index, slot) = decode(*self);
        write!(
            f,
            "Handle(class={}, block={}, slot={})",
            class, block_index, slot
        )
    }
}

/// Pack a slot location into a handle
///
/// Inputs wider than their fields are a caller bug.
pub fn encode(class: usize, block_index: u64, slot: usize) -> Handle {
    debug_assert!((class as u64) < (1 << CLASS_BITS));
    debug_assert!(block_index <= MAX_BLOCK_INDEX);
    debug_assert!((slot as u64) <= SLOT_MASK);
    Handle(((class as u64) << HIGH_SHIFT) | (block_index << SLOT_BITS) | slot as u64)
}

/// Unpack a handle into `(class, block_index, slot)`
pub fn decode(handle: Handle) -> (usize, u64, usize) {
    let raw = handle.0;
    let class = (raw >> HIGH_SHIFT) as usize;
    let block_index = (raw & BLOCK_INDEX_MASK) >> SLOT_BITS;
    let slot = (raw & SLOT_MASK) as usize;
    (class, block_index, slot)
}
