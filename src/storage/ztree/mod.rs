//! ztree allocator
//!
//! Packs compressed objects of up to one page into blocks of 1, 2, 4 or 8
//! pages. Each of the sixteen size classes keeps its blocks in an ordered
//! tree keyed by block index, so a handle resolves to its block in
//! O(log n) without any indirection table.
//!
//! # Architecture
//!
//! ```text
//! Pool
//!   ├─→ BlockTree(class 0:  256B × 16, 1 page)  → {0, 1, 4}
//!   ├─→ BlockTree(class 1:  368B × 11, 1 page)  → {2}
//!   │    ...
//!   ├─→ BlockTree(class 15: 4096B × 8, 8 pages) → {}
//!   ├─→ BlockCache ("ztree_blocks") → PageAllocator
//!   └─→ Evict callback (used by reclaim)
//!
//! Handle = [class:4 | block index:56 | slot:4]
//! ```
//!
//! Allocation targets the class's current block, then its most recently
//! created block, and only then grows the tree. Reclaim walks classes from
//! the coarsest to the finest and never touches those two hot blocks.

pub mod block;
pub mod cache;
pub mod handle;
pub mod pages;
pub mod pool;
pub mod reclaim;
pub mod size_class;
pub mod slot;
pub mod stats;
pub mod tree;

pub use cache::{BlockCache, BlockCacheStats};
pub use handle::{decode, encode, Handle};
pub use pages::{AllocCtx, PageAllocator};
pub use pool::{Evict, Pool};
pub use reclaim::{ReclaimResult, ShrinkReport};
pub use size_class::{
    classify, size_class, SizeClass, CLASS_COUNT, MAX_SLOT_SIZE, SIZE_CLASSES, UNIT_SIZE,
};
pub use slot::SlotState;
pub use stats::{BlockSnapshot, ClassSnapshot, ClassStats, PoolStats};
pub use tree::BlockTree;
