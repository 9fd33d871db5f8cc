//! Block metadata cache
//!
//! Every block of a pool is created and released through one cache, which
//! pairs block metadata with its backing pages and keeps the accounting.

use super::block::Block;
use super::pages::{PageAllocator, Pages};
use super::size_class::size_class;
use crate::error::{Error, Result};
use crate::metrics;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Factory and accounting for block metadata
#[derive(Debug)]
pub struct BlockCache {
    name: &'static str,
    pages: Arc<PageAllocator>,
    created: AtomicU64,
    released: AtomicU64,
    /// Blocks created and not yet released
    live: AtomicU64,
    metrics: bool,
}

/// Cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct BlockCacheStats {
    pub name: &'static str,
    pub created: u64,
    pub released: u64,
    pub live: u64,
    pub pages_in_use: usize,
}

impl BlockCache {
    pub fn new(pages: Arc<PageAllocator>, metrics: bool) -> Self {
        Self {
            name: "ztree_blocks",
            pages,
            created: AtomicU64::new(0),
            released: AtomicU64::new(0),
            live: AtomicU64::new(0),
            metrics,
        }
    }

    /// Obtain backing pages for a new block of `class`
    pub fn alloc_pages(&self, class: usize, zeroed: bool) -> Result<Pages> {
        let units = size_class(class).units;
        self.pages.alloc_pages(units, zeroed).ok_or_else(|| {
            debug!(class, units, "Backing page allocation failed");
            Error::OutOfMemory { class, units }
        })
    }

    /// Build block metadata around freshly allocated pages
    pub fn create(&self, class: usize, index: u64, pages: Pages) -> Arc<Block> {
        self.created.fetch_add(1, Ordering::Relaxed);
        self.live.fetch_add(1, Ordering::Relaxed);
        if self.metrics {
            metrics::BLOCKS.with_label_values(&[&class.to_string()]).inc();
        }
        debug!(class, index, "Created block");
        Arc::new(Block::new(class, index, pages))
    }

    /// Drop a block removed from its tree
    ///
    /// Pages return to the allocator once the last reference is gone.
    pub fn release(&self, block: Arc<Block>) {
        self.released.fetch_add(1, Ordering::Relaxed);
        self.live.fetch_sub(1, Ordering::Relaxed);
        if self.metrics {
            metrics::BLOCKS
                .with_label_values(&[&block.class().to_string()])
                .dec();
        }
        debug!(class = block.class(), index = block.index(), "Released block");
    }

    pub fn stats(&self) -> BlockCacheStats {
        BlockCacheStats {
            name: self.name,
            created: self.created.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            live: self.live.load(Ordering::Relaxed),
            pages_in_use: self.pages.pages_in_use(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_accounting() -> Result<()> {
        let cache = BlockCache::new(PageAllocator::new(None), false);
        let pages = cache.alloc_pages(4, false)?;
        let block = cache.create(4, 0, pages);
        assert_eq!(cache.stats().live, 1);
        assert_eq!(cache.stats().pages_in_use, 2);

        cache.release(block);
        let stats = cache.stats();
        assert_eq!(stats.created, 1);
        assert_eq!(stats.released, 1);
        assert_eq!(stats.live, 0);
        assert_eq!(stats.pages_in_use, 0);
        Ok(())
    }

    #[test]
    fn test_cache_out_of_memory() {
        let cache = BlockCache::new(PageAllocator::new(Some(4)), false);
        let err = cache.alloc_pages(15, false).unwrap_err();
        assert_eq!(err, Error::OutOfMemory { class: 15, units: 8 });
    }
}
