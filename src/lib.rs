// ztree - block-tree allocator for compressed pages
// Packs small compressed objects densely into page-sized blocks

#![warn(rust_2018_idioms)]

pub mod config;
pub mod metrics;
pub mod storage;

// Re-exports for convenience
pub use config::PoolConfig;
pub use storage::ztree::{
    AllocCtx, ClassSnapshot, Evict, Handle, Pool, PoolStats, ReclaimResult, ShrinkReport,
    SlotState,
};

/// ztree error types
pub mod error {
    use crate::storage::ztree::Handle;
    use thiserror::Error;

    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum Error {
        #[error("Invalid size: zero-byte allocation")]
        InvalidSize,

        #[error("Too large: {size} bytes exceeds the largest slot ({max} bytes)")]
        TooLarge { size: usize, max: usize },

        #[error("Out of memory: cannot back a class {class} block of {units} pages")]
        OutOfMemory { class: usize, units: usize },

        #[error("Not found: {0} does not resolve to a live slot")]
        NotFound(Handle),

        #[error("Eviction failed for {handle}: {reason}")]
        EvictionFailed { handle: Handle, reason: String },

        #[error("Configuration error: {0}")]
        Config(String),

        #[error("Driver error: {0}")]
        Driver(String),
    }

    pub type Result<T> = std::result::Result<T, Error>;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
