//! zpool driver layer
//!
//! A compressed-page store selects its allocator backend by name. Drivers
//! register in a process-wide registry; the ztree driver is always present.

use super::ztree::{AllocCtx, Handle, Pool, ShrinkReport};
use crate::config::PoolConfig;
use crate::error::{Error, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::Arc;
use tracing::{debug, info};

/// Hooks the owner of a pool supplies at creation time
pub trait ZpoolOps: Send + Sync {
    /// Write the object behind `handle` back to its origin and drop it
    fn evict(&self, handle: Handle) -> Result<()>;
}

/// A live pool created by a driver
pub trait ZpoolBackend: Send + Sync {
    fn type_name(&self) -> &'static str;
    fn name(&self) -> &str;
    fn malloc(&self, size: usize, ctx: AllocCtx) -> Result<Handle>;
    fn free(&self, handle: Handle) -> Result<()>;
    /// Evict up to `pages` objects
    fn shrink(&self, pages: usize) -> ShrinkReport;
    fn map(&self, handle: Handle) -> Result<NonNull<u8>>;
    fn unmap(&self, handle: Handle) -> Result<()>;
    /// Pool capacity in bytes
    fn total_size(&self) -> u64;
}

/// Factory for one backend type
pub trait ZpoolDriver: Send + Sync {
    fn type_name(&self) -> &'static str;
    fn create(
        &self,
        name: &str,
        config: &PoolConfig,
        ops: Option<Arc<dyn ZpoolOps>>,
    ) -> Result<Box<dyn ZpoolBackend>>;
}

/// Driver for the ztree allocator
#[derive(Debug, Default)]
pub struct ZtreeDriver;

/// A ztree pool behind the zpool interface
pub struct ZtreeBackend {
    name: String,
    pool: Pool,
}

impl ZtreeBackend {
    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

impl ZpoolDriver for ZtreeDriver {
    fn type_name(&self) -> &'static str {
        "ztree"
    }

    fn create(
        &self,
        name: &str,
        config: &PoolConfig,
        ops: Option<Arc<dyn ZpoolOps>>,
    ) -> Result<Box<dyn ZpoolBackend>> {
        // Without ops every eviction fails and reclaim only ever retries
        let evictor: Option<Box<dyn super::ztree::Evict>> = ops.map(|ops| {
            Box::new(move |_: &Pool, handle: Handle| ops.evict(handle))
                as Box<dyn super::ztree::Evict>
        });
        let pool = Pool::with_config(config.clone(), evictor)?;
        Ok(Box::new(ZtreeBackend {
            name: name.to_string(),
            pool,
        }))
    }
}

impl ZpoolBackend for ZtreeBackend {
    fn type_name(&self) -> &'static str {
        "ztree"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn malloc(&self, size: usize, ctx: AllocCtx) -> Result<Handle> {
        self.pool.alloc(size, ctx)
    }

    fn free(&self, handle: Handle) -> Result<()> {
        self.pool.free(handle)
    }

    fn shrink(&self, pages: usize) -> ShrinkReport {
        self.pool.shrink(pages)
    }

    fn map(&self, handle: Handle) -> Result<NonNull<u8>> {
        self.pool.map(handle)
    }

    fn unmap(&self, handle: Handle) -> Result<()> {
        self.pool.unmap(handle)
    }

    fn total_size(&self) -> u64 {
        self.pool.pool_size_bytes()
    }
}

lazy_static::lazy_static! {
    /// Registered drivers by type name
    static ref DRIVERS: RwLock<HashMap<&'static str, Arc<dyn ZpoolDriver>>> = {
        let mut drivers: HashMap<&'static str, Arc<dyn ZpoolDriver>> = HashMap::new();
        drivers.insert("ztree", Arc::new(ZtreeDriver));
        RwLock::new(drivers)
    };
}

/// Register a driver under its type name
pub fn register_driver(driver: Arc<dyn ZpoolDriver>) -> Result<()> {
    let type_name = driver.type_name();
    let mut drivers = DRIVERS.write();
    if drivers.contains_key(type_name) {
        return Err(Error::Driver(format!(
            "driver '{}' is already registered",
            type_name
        )));
    }
    drivers.insert(type_name, driver);
    info!(driver = type_name, "Registered zpool driver");
    Ok(())
}

/// Remove a driver; returns false if it was not registered
pub fn unregister_driver(type_name: &str) -> bool {
    let removed = DRIVERS.write().remove(type_name).is_some();
    if removed {
        info!(driver = type_name, "Unregistered zpool driver");
    }
    removed
}

pub fn has_driver(type_name: &str) -> bool {
    DRIVERS.read().contains_key(type_name)
}

/// Registered type names, sorted
pub fn driver_names() -> Vec<&'static str> {
    let mut names: Vec<_> = DRIVERS.read().keys().copied().collect();
    names.sort_unstable();
    names
}

/// Create a pool with the driver registered as `type_name`
pub fn create_pool(
    type_name: &str,
    name: &str,
    config: &PoolConfig,
    ops: Option<Arc<dyn ZpoolOps>>,
) -> Result<Box<dyn ZpoolBackend>> {
    let driver = DRIVERS
        .read()
        .get(type_name)
        .cloned()
        .ok_or_else(|| Error::Driver(format!("no zpool driver named '{}'", type_name)))?;
    debug!(driver = type_name, pool = name, "Creating zpool");
    driver.create(name, config, ops)
}
