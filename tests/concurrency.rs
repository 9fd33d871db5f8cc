//! Concurrency tests for the ztree pool
//!
//! Many threads share one pool by reference; every test ends by checking
//! the per-block slot accounting through `inspect_class`.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use ztree::error::Result;
use ztree::storage::ztree::{AllocCtx, Handle, Pool, SlotState, CLASS_COUNT};

const THREADS: usize = 8;

/// Free-slot counters must agree with the recorded slot states
fn assert_accounting(pool: &Pool) {
    for class in 0..CLASS_COUNT {
        let snapshot = pool.inspect_class(class).unwrap();
        for block in &snapshot.blocks {
            let free = block.slots.iter().filter(|s| **s == SlotState::Free).count();
            assert_eq!(free, block.free_slots, "class {} block {}", class, block.index);
            assert!(!block.under_reclaim);
        }
        for index in [snapshot.current_block, snapshot.last_block]
            .into_iter()
            .flatten()
        {
            assert!(snapshot.block(index).is_some(), "dangling hot block {}", index);
        }
    }
}

#[test]
fn test_parallel_alloc_never_double_issues() -> Result<()> {
    let pool = Pool::without_evictor();

    let handles: Vec<Vec<Handle>> = thread::scope(|s| {
        let workers: Vec<_> = (0..THREADS)
            .map(|_| {
                s.spawn(|| {
                    (0..500)
                        .map(|_| pool.alloc(200, AllocCtx::default()))
                        .collect::<Result<Vec<_>>>()
                })
            })
            .collect();
        workers
            .into_iter()
            .map(|w| w.join().unwrap())
            .collect::<Result<_>>()
    })?;

    let unique: HashSet<Handle> = handles.iter().flatten().copied().collect();
    assert_eq!(unique.len(), THREADS * 500);
    assert!(unique.iter().all(|h| h.class() == 0));

    let stats = pool.stats();
    assert_eq!(stats.used_slots, THREADS * 500);
    // Racing growers can each add a block, so 250 is only the floor
    assert!(stats.classes[0].blocks >= 250);
    assert_accounting(&pool);
    Ok(())
}

#[test]
fn test_parallel_churn_returns_all_memory() -> Result<()> {
    let pool = Pool::without_evictor();

    thread::scope(|s| {
        let workers: Vec<_> = (0..THREADS)
            .map(|worker| {
                let pool = &pool;
                s.spawn(move || -> Result<()> {
                    let size = 64 + worker * 480;
                    let mut live = Vec::new();
                    for round in 0..2000 {
                        if round % 3 == 2 {
                            let (handle, tag): (Handle, u8) = live.swap_remove(round % live.len());
                            let mut buf = [0u8; 32];
                            pool.read(handle, &mut buf)?;
                            assert!(buf.iter().all(|&b| b == tag));
                            pool.free(handle)?;
                        } else {
                            let handle = pool.alloc(size, AllocCtx::default())?;
                            let tag = (round % 251) as u8;
                            pool.write(handle, &[tag; 32])?;
                            live.push((handle, tag));
                        }
                    }
                    for (handle, _) in live {
                        pool.free(handle)?;
                    }
                    Ok(())
                })
            })
            .collect();
        workers
            .into_iter()
            .try_for_each(|w| w.join().unwrap())
    })?;

    assert_eq!(pool.pool_size_bytes(), 0);
    assert_eq!(pool.stats().total_blocks, 0);
    assert_accounting(&pool);
    Ok(())
}

#[test]
fn test_reclaim_races_with_free() -> Result<()> {
    let evicted = Arc::new(Mutex::new(HashSet::new()));
    let log = Arc::clone(&evicted);
    let pool = Pool::new(move |pool: &Pool, handle: Handle| -> Result<()> {
        // Read the object out before the pool drops it
        let mut buf = [0u8; 8];
        pool.read(handle, &mut buf)?;
        assert!(log.lock().insert(handle), "evicted twice: {}", handle);
        Ok(())
    });

    let owned: Vec<Vec<Handle>> = (0..THREADS)
        .map(|_| {
            (0..300)
                .map(|_| {
                    let handle = pool.alloc(900, AllocCtx::default())?;
                    pool.write(handle, &[0xee; 8])?;
                    Ok(handle)
                })
                .collect::<Result<Vec<_>>>()
        })
        .collect::<Result<_>>()?;

    thread::scope(|s| {
        for handles in &owned {
            let pool = &pool;
            s.spawn(move || {
                for &handle in handles {
                    // A handle reclaim already took is simply gone
                    let _ = pool.free(handle);
                }
            });
        }
        s.spawn(|| while pool.shrink(64).reclaimed > 0 {});
    });

    // Reclaim may have run dry before the frees finished
    pool.shrink(usize::MAX);
    for handles in &owned {
        for &handle in handles {
            let _ = pool.free(handle);
        }
    }

    assert_eq!(pool.stats().used_slots, 0);
    assert_eq!(pool.pool_size_bytes(), 0);
    assert_accounting(&pool);
    Ok(())
}

#[test]
fn test_stats_during_block_churn() -> Result<()> {
    let pool = Pool::without_evictor();
    let stop = AtomicBool::new(false);

    thread::scope(|s| {
        let churners: Vec<_> = (0..3)
            .map(|_| {
                s.spawn(|| -> Result<()> {
                    // Each round creates and destroys a class-0 block
                    for _ in 0..20_000 {
                        let handle = pool.alloc(64, AllocCtx::default())?;
                        pool.free(handle)?;
                    }
                    Ok(())
                })
            })
            .collect();

        let reader = s.spawn(|| {
            let mut samples = 0u64;
            while !stop.load(Ordering::Relaxed) {
                let cache = pool.stats().cache.unwrap();
                // Each churner holds at most one block, plus one being torn down
                assert!(cache.live <= 6, "live blocks: {}", cache.live);
                samples += 1;
            }
            samples
        });

        let joined: Vec<_> = churners.into_iter().map(|w| w.join()).collect();
        stop.store(true, Ordering::Relaxed);
        assert!(reader.join().unwrap() > 0);
        joined.into_iter().try_for_each(|r| r.unwrap())
    })?;

    let cache = pool.stats().cache.unwrap();
    assert_eq!(cache.live, 0);
    assert_eq!(cache.created, cache.released);
    assert!(cache.created > 0);
    Ok(())
}
