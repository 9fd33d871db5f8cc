//! Storage layer
//!
//! # Architecture
//!
//! ```text
//! zpool driver registry ("ztree" → ZtreeDriver)
//!   └─→ ZpoolBackend (malloc / free / map / unmap / shrink / total_size)
//!        └─→ ztree::Pool
//!             └─→ 16 × BlockTree → Blocks → slots
//! ```
//!
//! Compressed-page stores talk to the allocator through the zpool traits,
//! so the backend can be selected by name at runtime.

pub mod zpool;
pub mod ztree;

pub use zpool::{create_pool, register_driver, ZpoolBackend, ZpoolDriver, ZpoolOps};
pub use ztree::{AllocCtx, Handle, Pool};
