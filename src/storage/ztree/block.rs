//! Blocks: fixed runs of pages carved into equal slots

use super::pages::Pages;
use super::size_class::{size_class, MAX_SLOTS};
use super::slot::SlotState;
use parking_lot::{Mutex, MutexGuard};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};

/// Occupancy score: zero when empty or full, highest at half occupancy
pub fn fragmentation_score(free_slots: usize, slots_per_block: usize) -> u32 {
    (free_slots * (slots_per_block - free_slots)) as u32
}

/// Slot bookkeeping guarded by the block lock
#[derive(Debug)]
pub struct BlockSlots {
    states: [SlotState; MAX_SLOTS],
    slots_per_block: usize,
    free_slots: usize,
    under_reclaim: bool,
}

impl BlockSlots {
    fn new(slots_per_block: usize) -> Self {
        Self {
            states: [SlotState::Free; MAX_SLOTS],
            slots_per_block,
            free_slots: slots_per_block,
            under_reclaim: false,
        }
    }

    /// Claim the first free slot, marking it occupied
    pub fn reserve_slot(&mut self) -> Option<usize> {
        let slot = self.states[..self.slots_per_block]
            .iter()
            .position(|s| s.is_free())?;
        self.states[slot] = SlotState::Occupied;
        self.free_slots -= 1;
        Some(slot)
    }

    /// Return a slot to the free set, whatever state it was in
    ///
    /// Returns false, changing nothing, if the slot was already free.
    pub fn release_slot(&mut self, slot: usize) -> bool {
        if self.states[slot].is_free() {
            return false;
        }
        self.states[slot] = SlotState::Free;
        self.free_slots += 1;
        true
    }

    pub fn set_state(&mut self, slot: usize, state: SlotState) {
        self.states[slot] = state;
    }

    pub fn state(&self, slot: usize) -> SlotState {
        self.states[slot]
    }

    pub fn states(&self) -> &[SlotState] {
        &self.states[..self.slots_per_block]
    }

    pub fn free_slots(&self) -> usize {
        self.free_slots
    }

    pub fn occupied_slots(&self) -> usize {
        self.slots_per_block - self.free_slots
    }

    pub fn slots_per_block(&self) -> usize {
        self.slots_per_block
    }

    pub fn has_room(&self) -> bool {
        self.free_slots > 0
    }

    pub fn is_fully_free(&self) -> bool {
        self.free_slots == self.slots_per_block
    }

    pub fn is_fully_occupied(&self) -> bool {
        self.free_slots == 0
    }

    pub fn under_reclaim(&self) -> bool {
        self.under_reclaim
    }

    pub fn set_under_reclaim(&mut self, under_reclaim: bool) {
        self.under_reclaim = under_reclaim;
    }

    pub fn fragmentation_score(&self) -> u32 {
        fragmentation_score(self.free_slots, self.slots_per_block)
    }
}

/// A block of one size class
///
/// The index and backing pages never change after creation; everything
/// else lives behind the block lock.
#[derive(Debug)]
pub struct Block {
    index: u64,
    class: usize,
    pages: Pages,
    /// Last published fragmentation score, readable without the lock
    score: AtomicU32,
    slots: Mutex<BlockSlots>,
}

impl Block {
    pub(crate) fn new(class: usize, index: u64, pages: Pages) -> Self {
        let slots_per_block = size_class(class).slots_per_block;
        Self {
            index,
            class,
            pages,
            score: AtomicU32::new(0),
            slots: Mutex::new(BlockSlots::new(slots_per_block)),
        }
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn class(&self) -> usize {
        self.class
    }

    /// Take the block lock
    pub fn lock(&self) -> MutexGuard<'_, BlockSlots> {
        self.slots.lock()
    }

    /// Fragmentation score as of the last slot mutation
    pub fn score(&self) -> u32 {
        self.score.load(Ordering::Acquire)
    }

    /// Publish the score of `slots`, which must be this block's guarded state
    pub fn publish_score(&self, slots: &BlockSlots) {
        self.score.store(slots.fragmentation_score(), Ordering::Release);
    }

    /// Start of slot `slot` in the backing pages
    pub fn slot_ptr(&self, slot: usize) -> NonNull<u8> {
        self.pages.offset_ptr(slot * size_class(self.class).slot_size)
    }

    pub fn slot_size(&self) -> usize {
        size_class(self.class).slot_size
    }

    pub fn slots_per_block(&self) -> usize {
        size_class(self.class).slots_per_block
    }
}
