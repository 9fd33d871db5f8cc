//! Integration tests for the public pool and zpool driver APIs

use parking_lot::Mutex;
use std::sync::Arc;
use ztree::error::{Error, Result};
use ztree::storage::ztree::{AllocCtx, ClassSnapshot, Handle, Pool, ReclaimResult, SlotState};
use ztree::storage::{
    create_pool, register_driver, zpool, ZpoolBackend, ZpoolDriver, ZpoolOps,
};
use ztree::PoolConfig;

/// Swap-like store that records what it took back
#[derive(Default)]
struct BackingStore {
    evicted: Mutex<Vec<Handle>>,
}

impl ZpoolOps for BackingStore {
    fn evict(&self, handle: Handle) -> Result<()> {
        self.evicted.lock().push(handle);
        Ok(())
    }
}

fn hot_indices(snapshot: &ClassSnapshot) -> Vec<u64> {
    [snapshot.current_block, snapshot.last_block]
        .into_iter()
        .flatten()
        .collect()
}

#[test]
fn test_evictor_reads_object_before_release() -> Result<()> {
    let saved = Arc::new(Mutex::new(Vec::new()));
    let store = Arc::clone(&saved);
    let pool = Pool::new(move |pool: &Pool, handle: Handle| -> Result<()> {
        let mut data = vec![0u8; 5];
        pool.read(handle, &mut data)?;
        store.lock().push((handle, data));
        Ok(())
    });

    let handles: Vec<Handle> = (0..9)
        .map(|_| pool.alloc(3000, AllocCtx::default()))
        .collect::<Result<_>>()?;
    for (i, &handle) in handles.iter().enumerate() {
        pool.write(handle, format!("pg{:03}", i).as_bytes())?;
    }

    // Class 14 packs 10 slots, so everything shares the single hot block
    assert_eq!(pool.reclaim_one_pass(), ReclaimResult::NoBlocksEligible);

    let more: Vec<Handle> = (0..2)
        .map(|_| pool.alloc(3000, AllocCtx::default()))
        .collect::<Result<_>>()?;
    pool.write(more[0], b"pg009")?;
    assert_eq!(pool.reclaim_one_pass(), ReclaimResult::Reclaimed(10));

    let saved = saved.lock();
    assert_eq!(saved.len(), 10);
    assert_eq!(saved[0], (handles[0], b"pg000".to_vec()));
    assert_eq!(saved[9], (more[0], b"pg009".to_vec()));
    assert_eq!(pool.slot_state(more[1]), Some(SlotState::Occupied));
    Ok(())
}

#[test]
fn test_mapped_object_survives_reclaim() -> Result<()> {
    let pool = Pool::new(|_: &Pool, _: Handle| -> Result<()> { Ok(()) });
    let handles: Vec<Handle> = (0..12)
        .map(|_| pool.alloc(500, AllocCtx::default()))
        .collect::<Result<_>>()?;
    let pinned = handles[3];
    for &handle in &handles[..8] {
        pool.write(handle, b"obj")?;
    }
    let ptr = pool.map(pinned)?;

    assert_eq!(pool.reclaim_one_pass(), ReclaimResult::Reclaimed(7));
    assert_eq!(pool.slot_state(pinned), Some(SlotState::Mapped));
    // SAFETY: the slot is still mapped and holds at least three bytes
    let head = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), 3) };
    assert_eq!(head, b"obj");

    pool.unmap(pinned)?;
    assert_eq!(pool.reclaim_one_pass(), ReclaimResult::Reclaimed(1));
    assert_eq!(pool.map(pinned), Err(Error::NotFound(pinned)));
    Ok(())
}

#[test]
fn test_hot_blocks_follow_frees() -> Result<()> {
    let pool = Pool::without_evictor();
    let handles: Vec<Handle> = (0..24)
        .map(|_| pool.alloc(1000, AllocCtx::default()))
        .collect::<Result<_>>()?;
    let snapshot = pool.inspect_class(4).unwrap();
    assert_eq!(snapshot.block_indices().len(), 3);
    assert_eq!(hot_indices(&snapshot), vec![2, 2]);

    // Half-emptying block 0 makes it the best allocation target
    for &handle in &handles[..4] {
        pool.free(handle)?;
    }
    let snapshot = pool.inspect_class(4).unwrap();
    assert_eq!(snapshot.current_block, Some(0));
    assert_eq!(snapshot.last_block, Some(2));

    let refill = pool.alloc(1000, AllocCtx::default())?;
    assert_eq!(refill.block_index(), 0);
    Ok(())
}

#[test]
fn test_no_grow_context() -> Result<()> {
    let pool = Pool::without_evictor();
    assert!(matches!(
        pool.alloc(100, AllocCtx::no_grow()),
        Err(Error::OutOfMemory { class: 0, .. })
    ));

    let first = pool.alloc(100, AllocCtx::default())?;
    let second = pool.alloc(100, AllocCtx::no_grow())?;
    assert_eq!(first.block_index(), second.block_index());
    Ok(())
}

#[test]
fn test_page_limit_from_config() -> Result<()> {
    let config = PoolConfig::from_toml("page_limit = 8\nzero_new_blocks = true\n")?;
    let pool = Pool::with_config(config, None)?;
    let ctx = pool.default_ctx();
    assert!(ctx.zeroed);

    // One 8-page block of class 15 uses the whole budget
    let handles: Vec<Handle> = (0..8)
        .map(|_| pool.alloc(4096, ctx))
        .collect::<Result<_>>()?;
    let mut buf = [0xffu8; 64];
    pool.read(handles[0], &mut buf)?;
    assert!(buf.iter().all(|&b| b == 0));

    assert!(matches!(
        pool.alloc(4096, ctx),
        Err(Error::OutOfMemory { class: 15, units: 8 })
    ));
    assert!(matches!(
        pool.alloc(10, ctx),
        Err(Error::OutOfMemory { class: 0, units: 1 })
    ));

    pool.free(handles[0])?;
    assert!(pool.alloc(4096, ctx).is_ok());
    Ok(())
}

#[test]
fn test_invalid_config_rejected() {
    let config = PoolConfig {
        shrink_batch: 0,
        ..PoolConfig::default()
    };
    assert!(matches!(Pool::with_config(config, None), Err(Error::Config(_))));
}

struct LoggingDriver;

impl ZpoolDriver for LoggingDriver {
    fn type_name(&self) -> &'static str {
        "ztree-logged"
    }

    fn create(
        &self,
        name: &str,
        config: &PoolConfig,
        ops: Option<Arc<dyn ZpoolOps>>,
    ) -> Result<Box<dyn ZpoolBackend>> {
        create_pool("ztree", name, config, ops)
    }
}

#[test]
fn test_custom_driver_registration() -> Result<()> {
    register_driver(Arc::new(LoggingDriver))?;
    assert!(matches!(
        register_driver(Arc::new(LoggingDriver)),
        Err(Error::Driver(_))
    ));

    let store = Arc::new(BackingStore::default());
    let backend = create_pool(
        "ztree-logged",
        "zswap",
        &PoolConfig::default(),
        Some(store.clone() as Arc<dyn ZpoolOps>),
    )?;
    assert_eq!(backend.type_name(), "ztree");
    assert_eq!(backend.name(), "zswap");

    let handles: Vec<Handle> = (0..17)
        .map(|_| backend.malloc(256, AllocCtx::default()))
        .collect::<Result<_>>()?;
    for &handle in &handles {
        backend.map(handle)?;
        backend.unmap(handle)?;
    }
    let report = backend.shrink(16);
    assert!(report.target_met());
    assert_eq!(store.evicted.lock().len(), 16);
    assert_eq!(backend.total_size(), 16 * 256);

    // Existing pools outlive their driver's registration
    assert!(zpool::unregister_driver("ztree-logged"));
    assert!(!zpool::has_driver("ztree-logged"));
    backend.free(handles[16])?;
    assert_eq!(backend.total_size(), 0);
    Ok(())
}
