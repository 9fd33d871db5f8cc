//! Size class catalog for the ztree allocator
//!
//! Sixteen fixed block geometries, ordered from the best compression
//! (small slots, many per block) to the worst (whole-page slots).

use crate::error::{Error, Result};
use serde::Serialize;

/// Size of one backing allocation unit (a physical page)
pub const UNIT_SIZE: usize = 4096;

/// Slots are aligned to the machine word
pub const SLOT_ALIGN: usize = 8;

/// Number of size classes
pub const CLASS_COUNT: usize = 16;

/// Upper bound on slots in any block
pub const MAX_SLOTS: usize = 16;

/// Geometry of one size class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SizeClass {
    /// Size of each slot (bytes)
    pub slot_size: usize,
    /// Number of slots carved from one block
    pub slots_per_block: usize,
    /// Backing units per block (1, 2, 4 or 8)
    pub units: usize,
}

impl SizeClass {
    const fn new(slot_size: usize, slots_per_block: usize, units: usize) -> Self {
        Self {
            slot_size,
            slots_per_block,
            units,
        }
    }

    /// Largest word-aligned slot that lets `slots` fit into `units` pages
    const fn packed(slots: usize, units: usize) -> Self {
        let slot_size = units * UNIT_SIZE / (slots * SLOT_ALIGN) * SLOT_ALIGN;
        Self::new(slot_size, slots, units)
    }

    /// Bytes of backing memory per block
    pub const fn block_bytes(&self) -> usize {
        self.units * UNIT_SIZE
    }

    /// Bytes of slot capacity per block
    pub const fn capacity_bytes(&self) -> usize {
        self.slot_size * self.slots_per_block
    }

    /// Check if a given size fits in this size class
    pub fn can_fit(&self, size: usize) -> bool {
        size <= self.slot_size
    }
}

/// The catalog, best compression first
pub const SIZE_CLASSES: [SizeClass; CLASS_COUNT] = [
    SizeClass::new(UNIT_SIZE / 16, 16, 1),
    SizeClass::packed(11, 1),
    SizeClass::new(UNIT_SIZE / 8, 8, 1),
    SizeClass::packed(11, 2),
    SizeClass::new(UNIT_SIZE / 4, 8, 2),
    SizeClass::packed(14, 4),
    SizeClass::packed(12, 4),
    SizeClass::packed(10, 4),
    SizeClass::packed(9, 4),
    SizeClass::new(UNIT_SIZE / 2, 8, 4),
    SizeClass::packed(14, 8),
    SizeClass::packed(13, 8),
    SizeClass::packed(12, 8),
    SizeClass::packed(11, 8),
    SizeClass::packed(10, 8),
    SizeClass::new(UNIT_SIZE, 8, 8),
];

/// Largest object the allocator accepts
pub const MAX_SLOT_SIZE: usize = SIZE_CLASSES[CLASS_COUNT - 1].slot_size;

/// Geometry of class `index`
///
/// Panics if `index >= CLASS_COUNT`; handle decoding never produces such an index.
pub fn size_class(index: usize) -> &'static SizeClass {
    &SIZE_CLASSES[index]
}

/// Smallest class whose slot holds `size` bytes
pub fn classify(size: usize) -> Result<usize> {
    if size == 0 {
        return Err(Error::InvalidSize);
    }
    SIZE_CLASSES
        .iter()
        .position(|sc| sc.can_fit(size))
        .ok_or(Error::TooLarge {
            size,
            max: MAX_SLOT_SIZE,
        })
}
