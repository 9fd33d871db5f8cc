//! Block index tree
//!
//! One tree per size class, keyed by block index. Lock order is always
//! tree lock first, then at most one block lock; the tree lock may be
//! released while the block lock is still held, never the reverse.
//!
//! ```text
//! BlockTree(class 4)
//!   ├─→ 0  [O O U F F F F F]
//!   ├─→ 3  [M O O O O O F F]   ← current
//!   └─→ 7  [O F F F F F F F]   ← last
//! ```

use super::block::{Block, BlockSlots};
use super::cache::BlockCache;
use super::handle::{encode, Handle, MAX_BLOCK_INDEX};
use super::pages::AllocCtx;
use super::size_class::size_class;
use super::slot::SlotState;
use super::stats::{BlockSnapshot, ClassSnapshot};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// Non-owning reference to a block held by the tree
#[derive(Debug, Clone)]
struct HotRef {
    index: u64,
    block: Weak<Block>,
}

impl HotRef {
    fn new(block: &Arc<Block>) -> Self {
        Self {
            index: block.index(),
            block: Arc::downgrade(block),
        }
    }
}

/// State guarded by the tree lock
#[derive(Debug)]
struct TreeInner {
    blocks: BTreeMap<u64, Arc<Block>>,
    /// Next allocation target
    current: Option<HotRef>,
    /// Most recently inserted block
    last: Option<HotRef>,
    counter: u64,
    index_limit: u64,
}

impl TreeInner {
    fn current_index(&self) -> Option<u64> {
        self.current.as_ref().map(|r| r.index)
    }

    fn last_index(&self) -> Option<u64> {
        self.last.as_ref().map(|r| r.index)
    }

    fn is_hot(&self, index: u64) -> bool {
        self.current_index() == Some(index) || self.last_index() == Some(index)
    }

    /// Blocks in index order, skipping current and last
    fn cold_blocks(&self) -> impl Iterator<Item = &Arc<Block>> + '_ {
        self.blocks
            .iter()
            .filter(move |(index, _)| !self.is_hot(**index))
            .map(|(_, block)| block)
    }

    /// Next unused block index, wrapping at the index limit
    fn next_index(&mut self) -> u64 {
        loop {
            let index = self.counter;
            self.counter = (self.counter + 1) % self.index_limit;
            if !self.blocks.contains_key(&index) {
                return index;
            }
        }
    }

    /// Exact-key lookup, trying the current block first
    fn find(&self, index: u64) -> Option<Arc<Block>> {
        if let Some(current) = &self.current {
            if current.index == index {
                if let Some(block) = current.block.upgrade() {
                    return Some(block);
                }
            }
        }
        self.blocks.get(&index).cloned()
    }

    /// Unlink a block and clear or redirect hot references to it
    fn remove(&mut self, index: u64) -> Option<Arc<Block>> {
        let block = self.blocks.remove(&index)?;
        if self.last_index() == Some(index) {
            self.last = None;
        }
        if self.current_index() == Some(index) {
            self.current = self.last.clone();
        }
        Some(block)
    }
}

/// All live blocks of one size class
#[derive(Debug)]
pub struct BlockTree {
    class: usize,
    inner: Mutex<TreeInner>,
}

impl BlockTree {
    pub fn new(class: usize) -> Self {
        Self::with_index_limit(class, MAX_BLOCK_INDEX)
    }

    pub(crate) fn with_index_limit(class: usize, index_limit: u64) -> Self {
        Self {
            class,
            inner: Mutex::new(TreeInner {
                blocks: BTreeMap::new(),
                current: None,
                last: None,
                counter: 0,
                index_limit,
            }),
        }
    }

    pub fn class(&self) -> usize {
        self.class
    }

    pub fn block_count(&self) -> usize {
        self.inner.lock().blocks.len()
    }

    /// Hand out one slot, creating a block if neither hot block has room
    pub fn allocate_slot(&self, cache: &BlockCache, ctx: AllocCtx) -> Result<Handle> {
        let mut tree = self.inner.lock();

        let hot = [tree.current.clone(), tree.last.clone()];
        for (promote, hot_ref) in hot.into_iter().enumerate() {
            let Some(block) = hot_ref.as_ref().and_then(|r| r.block.upgrade()) else {
                continue;
            };
            let mut slots = block.lock();
            if !slots.has_room() || slots.under_reclaim() {
                continue;
            }
            if promote == 1 {
                tree.current = hot_ref;
            }
            drop(tree);
            return self.reserve(&block, &mut slots);
        }
        drop(tree);

        if !ctx.may_grow {
            return Err(Error::OutOfMemory {
                class: self.class,
                units: size_class(self.class).units,
            });
        }

        // Page allocation may block, so it happens outside the tree lock
        let pages = cache.alloc_pages(self.class, ctx.zeroed)?;

        let mut tree = self.inner.lock();
        let index = tree.next_index();
        let block = cache.create(self.class, index, pages);
        tree.blocks.insert(index, Arc::clone(&block));
        tree.current = Some(HotRef::new(&block));
        tree.last = Some(HotRef::new(&block));
        let mut slots = block.lock();
        drop(tree);
        self.reserve(&block, &mut slots)
    }

    fn reserve(&self, block: &Block, slots: &mut BlockSlots) -> Result<Handle> {
        let slot = slots.reserve_slot().ok_or(Error::OutOfMemory {
            class: self.class,
            units: size_class(self.class).units,
        })?;
        block.publish_score(slots);
        Ok(encode(self.class, block.index(), slot))
    }

    /// Release the slot behind `handle`
    ///
    /// A no-op while the owning block is under reclaim. The block is
    /// destroyed once its last slot is freed.
    pub fn free_slot(&self, handle: Handle, cache: &BlockCache) -> Result<()> {
        let (_, block_index, slot) = super::handle::decode(handle);

        let mut tree = self.inner.lock();
        let Some(block) = tree.blocks.get(&block_index).cloned() else {
            warn!(%handle, "Free of a handle with no live block");
            return Err(Error::NotFound(handle));
        };

        let mut slots = block.lock();
        if slots.under_reclaim() {
            drop(tree);
            debug!(%handle, "Free refused: block under reclaim");
            return Ok(());
        }
        if slot >= slots.slots_per_block() || !slots.release_slot(slot) {
            drop(tree);
            warn!(%handle, "Free of a slot that is not allocated");
            return Err(Error::NotFound(handle));
        }
        block.publish_score(&slots);

        if slots.is_fully_free() {
            tree.remove(block_index);
            drop(tree);
            drop(slots);
            cache.release(block);
            return Ok(());
        }

        // Bias allocation toward blocks closest to half occupancy
        let promote = match tree.current.as_ref().and_then(|r| r.block.upgrade()) {
            None => true,
            Some(current) => block.score() >= current.score(),
        };
        if promote {
            tree.current = Some(HotRef::new(&block));
        }
        drop(tree);
        drop(slots);
        Ok(())
    }

    /// Resolve `handle` and run `f` on its block under the block lock
    ///
    /// The tree lock is held only for the lookup.
    pub fn with_slot<R>(
        &self,
        handle: Handle,
        f: impl FnOnce(&Block, &mut BlockSlots, usize) -> R,
    ) -> Result<R> {
        let (_, block_index, slot) = super::handle::decode(handle);

        let block = self
            .inner
            .lock()
            .find(block_index)
            .ok_or(Error::NotFound(handle))?;

        let mut slots = block.lock();
        if slot >= slots.slots_per_block() || slots.state(slot).is_free() {
            return Err(Error::NotFound(handle));
        }
        Ok(f(&block, &mut slots, slot))
    }

    /// Lowest-indexed block that is neither current nor last
    pub fn lowest_non_hot_block(&self) -> Option<u64> {
        let tree = self.inner.lock();
        let lowest = tree.cold_blocks().next().map(|block| block.index());
        lowest
    }

    /// Pick the lowest non-hot block not already being reclaimed and flag it
    pub fn begin_reclaim(&self) -> Option<Arc<Block>> {
        let tree = self.inner.lock();
        for block in tree.cold_blocks() {
            let mut slots = block.lock();
            if slots.under_reclaim() {
                continue;
            }
            slots.set_under_reclaim(true);
            return Some(Arc::clone(block));
        }
        None
    }

    /// Settle a block after an eviction scan
    ///
    /// Returns true if the block was emptied and destroyed.
    pub fn finish_reclaim(&self, block: Arc<Block>, cache: &BlockCache) -> bool {
        let mut tree = self.inner.lock();
        let mut slots = block.lock();
        if slots.is_fully_free() {
            tree.remove(block.index());
            drop(tree);
            drop(slots);
            cache.release(block);
            return true;
        }
        slots.set_under_reclaim(false);
        block.publish_score(&slots);
        drop(tree);
        drop(slots);
        false
    }

    /// Slot capacity of every live block, in bytes
    pub fn capacity_bytes(&self) -> u64 {
        let sc = size_class(self.class);
        (self.block_count() * sc.capacity_bytes()) as u64
    }

    pub fn snapshot(&self) -> ClassSnapshot {
        let tree = self.inner.lock();
        let blocks = tree
            .blocks
            .values()
            .map(|block| {
                let slots = block.lock();
                BlockSnapshot {
                    index: block.index(),
                    free_slots: slots.free_slots(),
                    fragmentation_score: slots.fragmentation_score(),
                    under_reclaim: slots.under_reclaim(),
                    slots: slots.states().to_vec(),
                }
            })
            .collect();
        ClassSnapshot {
            class: self.class,
            current_block: tree.current_index(),
            last_block: tree.last_index(),
            blocks,
        }
    }

    /// Unlink and release every block
    pub fn drain(&self, cache: &BlockCache) -> usize {
        let mut tree = self.inner.lock();
        tree.current = None;
        tree.last = None;
        let blocks = std::mem::take(&mut tree.blocks);
        drop(tree);

        let count = blocks.len();
        for block in blocks.into_values() {
            cache.release(block);
        }
        count
    }

    /// State of one slot, if its block is live
    pub fn slot_state(&self, handle: Handle) -> Option<SlotState> {
        let (_, block_index, slot) = super::handle::decode(handle);
        let block = self.inner.lock().find(block_index)?;
        let slots = block.lock();
        (slot < slots.slots_per_block()).then(|| slots.state(slot))
    }
}
