//! ztree pool
//!
//! Owns one block tree per size class, the block metadata cache and the
//! client's eviction callback.

use super::cache::BlockCache;
use super::handle::Handle;
use super::pages::{AllocCtx, PageAllocator};
use super::size_class::{classify, size_class, CLASS_COUNT};
use super::slot::SlotState;
use super::stats::{ClassSnapshot, ClassStats, PoolStats};
use super::tree::BlockTree;
use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crate::metrics;
use std::ptr::{self, NonNull};
use tracing::{debug, info};

/// Eviction callback invoked by reclaim for every unmapped slot
///
/// Runs without any pool lock held. It may `map`/`unmap` the handle to
/// read the object out; a `free` of that handle is ignored until the scan
/// of its block completes.
pub trait Evict: Send + Sync {
    fn evict(&self, pool: &Pool, handle: Handle) -> Result<()>;
}

impl<F> Evict for F
where
    F: Fn(&Pool, Handle) -> Result<()> + Send + Sync,
{
    fn evict(&self, pool: &Pool, handle: Handle) -> Result<()> {
        self(pool, handle)
    }
}

/// A pool of compressed-object slots
pub struct Pool {
    trees: [BlockTree; CLASS_COUNT],
    cache: BlockCache,
    evictor: Option<Box<dyn Evict>>,
    config: PoolConfig,
}

impl Pool {
    /// Create a pool with default configuration
    pub fn new<E: Evict + 'static>(evictor: E) -> Self {
        Self::build(PoolConfig::default(), Some(Box::new(evictor)))
    }

    /// Create a pool whose reclaim can never evict
    pub fn without_evictor() -> Self {
        Self::build(PoolConfig::default(), None)
    }

    /// Create a pool from configuration
    pub fn with_config(config: PoolConfig, evictor: Option<Box<dyn Evict>>) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config, evictor))
    }

    fn build(config: PoolConfig, evictor: Option<Box<dyn Evict>>) -> Self {
        if config.metrics {
            metrics::init_metrics();
        }
        let pages = PageAllocator::new(config.page_limit);
        info!(
            classes = CLASS_COUNT,
            page_limit = ?config.page_limit,
            evictor = evictor.is_some(),
            "Creating ztree pool"
        );
        Self {
            trees: std::array::from_fn(BlockTree::new),
            cache: BlockCache::new(pages, config.metrics),
            evictor,
            config,
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Default allocation context for this pool's configuration
    pub fn default_ctx(&self) -> AllocCtx {
        AllocCtx {
            zeroed: self.config.zero_new_blocks,
            ..AllocCtx::default()
        }
    }

    pub(crate) fn tree(&self, class: usize) -> &BlockTree {
        &self.trees[class]
    }

    pub(crate) fn cache(&self) -> &BlockCache {
        &self.cache
    }

    /// Allocate a slot able to hold `size` bytes
    pub fn alloc(&self, size: usize, ctx: AllocCtx) -> Result<Handle> {
        let class = classify(size)?;
        let handle = self.trees[class].allocate_slot(&self.cache, ctx)?;
        if self.config.metrics {
            metrics::ALLOCATIONS
                .with_label_values(&[&class.to_string()])
                .inc();
        }
        debug!(size, %handle, "Allocated slot");
        Ok(handle)
    }

    /// Free the slot behind `handle`, whatever its state
    pub fn free(&self, handle: Handle) -> Result<()> {
        let class = handle.class();
        self.trees[class].free_slot(handle, &self.cache)?;
        if self.config.metrics {
            metrics::FREES.with_label_values(&[&class.to_string()]).inc();
        }
        Ok(())
    }

    /// Map a slot for client access
    ///
    /// The pointer addresses `slot_size(handle)` bytes and stays valid
    /// until the handle is freed or evicted.
    pub fn map(&self, handle: Handle) -> Result<NonNull<u8>> {
        self.trees[handle.class()].with_slot(handle, |block, slots, slot| {
            slots.set_state(slot, SlotState::Mapped);
            block.slot_ptr(slot)
        })
    }

    /// Release a mapping, making the slot an eviction candidate
    pub fn unmap(&self, handle: Handle) -> Result<()> {
        self.trees[handle.class()].with_slot(handle, |_, slots, slot| {
            slots.set_state(slot, SlotState::Unmapped);
        })
    }

    /// Copy `data` into the slot (map, write, unmap)
    ///
    /// A slot the client already has mapped stays mapped.
    pub fn write(&self, handle: Handle, data: &[u8]) -> Result<()> {
        let max = self.slot_size(handle);
        if data.len() > max {
            return Err(Error::TooLarge {
                size: data.len(),
                max,
            });
        }
        self.trees[handle.class()].with_slot(handle, |block, slots, slot| {
            let prior = slots.state(slot);
            slots.set_state(slot, SlotState::Mapped);
            // SAFETY: the slot spans `max` bytes inside the block's pages and
            // the block lock serialises this copy against other helpers
            unsafe {
                ptr::copy_nonoverlapping(data.as_ptr(), block.slot_ptr(slot).as_ptr(), data.len());
            }
            slots.set_state(slot, state_after_copy(prior));
        })
    }

    /// Copy the first `buf.len()` bytes of the slot into `buf` (map, read, unmap)
    pub fn read(&self, handle: Handle, buf: &mut [u8]) -> Result<()> {
        let max = self.slot_size(handle);
        if buf.len() > max {
            return Err(Error::TooLarge {
                size: buf.len(),
                max,
            });
        }
        self.trees[handle.class()].with_slot(handle, |block, slots, slot| {
            let prior = slots.state(slot);
            slots.set_state(slot, SlotState::Mapped);
            // SAFETY: as in `write`, with the copy direction reversed
            unsafe {
                ptr::copy_nonoverlapping(
                    block.slot_ptr(slot).as_ptr(),
                    buf.as_mut_ptr(),
                    buf.len(),
                );
            }
            slots.set_state(slot, state_after_copy(prior));
        })
    }

    /// Slot size of the class `handle` belongs to
    pub fn slot_size(&self, handle: Handle) -> usize {
        size_class(handle.class()).slot_size
    }

    /// Current state of a slot, or None if its block is gone
    pub fn slot_state(&self, handle: Handle) -> Option<SlotState> {
        self.trees[handle.class()].slot_state(handle)
    }

    /// Slot capacity of all live blocks, in bytes
    pub fn pool_size_bytes(&self) -> u64 {
        self.trees.iter().map(|t| t.capacity_bytes()).sum()
    }

    /// Run the eviction callback for one slot
    pub(crate) fn evict(&self, handle: Handle) -> Result<()> {
        match &self.evictor {
            Some(evictor) => evictor.evict(self, handle),
            None => Err(Error::EvictionFailed {
                handle,
                reason: "no eviction handler installed".to_string(),
            }),
        }
    }

    /// Inspect the block tree of one class
    pub fn inspect_class(&self, class: usize) -> Option<ClassSnapshot> {
        self.trees.get(class).map(|t| t.snapshot())
    }

    /// Get statistics about the pool
    pub fn stats(&self) -> PoolStats {
        let mut stats = PoolStats::default();

        for tree in &self.trees {
            let sc = size_class(tree.class());
            let snapshot = tree.snapshot();
            let free_slots: usize = snapshot.blocks.iter().map(|b| b.free_slots).sum();
            let total_slots = snapshot.blocks.len() * sc.slots_per_block;
            let class_stats = ClassStats {
                index: tree.class(),
                slot_size: sc.slot_size,
                slots_per_block: sc.slots_per_block,
                units: sc.units,
                blocks: snapshot.blocks.len(),
                free_slots,
                used_slots: total_slots - free_slots,
                capacity_bytes: (snapshot.blocks.len() * sc.capacity_bytes()) as u64,
            };
            stats.total_blocks += class_stats.blocks;
            stats.used_slots += class_stats.used_slots;
            stats.capacity_bytes += class_stats.capacity_bytes;
            stats.classes.push(class_stats);
        }
        stats.cache = Some(self.cache.stats());

        stats
    }

    fn release_all(&self) -> usize {
        self.trees.iter().map(|t| t.drain(&self.cache)).sum()
    }

    /// Destroy the pool, releasing every remaining block
    ///
    /// Returns the number of blocks released.
    pub fn destroy(self) -> usize {
        let released = self.release_all();
        info!(blocks = released, "Destroyed ztree pool");
        released
    }
}

/// State a copy helper leaves behind: a client mapping survives it
fn state_after_copy(prior: SlotState) -> SlotState {
    match prior {
        SlotState::Mapped => SlotState::Mapped,
        _ => SlotState::Unmapped,
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        let released = self.release_all();
        if released > 0 {
            debug!(blocks = released, "Released blocks on pool drop");
        }
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.config)
            .field("evictor", &self.evictor.is_some())
            .finish()
    }
}
