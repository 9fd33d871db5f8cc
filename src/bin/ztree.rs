//! ztree command-line tool
//!
//! Inspect the size-class catalog and exercise a pool under load.
//!
//! # Examples
//!
//! ```bash
//! # Print the size-class catalog
//! ztree classes
//!
//! # Run a parallel churn workload, then shrink the pool
//! ztree stress --threads 8 --ops 100000 --max-size 3000
//!
//! # Show the effective configuration
//! ZTREE_PAGE_LIMIT=65536 ztree config
//! ```

use clap::{Args, Parser, Subcommand};
use rayon::prelude::*;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use ztree::storage::ztree::{Handle, Pool, SIZE_CLASSES};
use ztree::PoolConfig;

/// ztree - block-tree allocator for compressed pages
#[derive(Parser, Debug)]
#[command(name = "ztree")]
#[command(version = ztree::VERSION)]
#[command(about = "ztree - block-tree allocator for compressed pages", long_about = None)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Pool configuration file (TOML)
    #[arg(long, global = true, env = "ZTREE_CONFIG")]
    config: Option<PathBuf>,

    /// Log directory path (no file logging if unset)
    #[arg(long, global = true, env = "ZTREE_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info", env = "RUST_LOG")]
    log_level: String,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the size-class catalog
    Classes,

    /// Run a parallel alloc/write/read/free workload, then shrink
    Stress(StressArgs),

    /// Print the effective pool configuration as TOML
    Config,

    /// Show version
    Version,
}

/// Stress workload arguments
#[derive(Args, Debug)]
struct StressArgs {
    /// Worker threads
    #[arg(short, long, default_value = "4")]
    threads: usize,

    /// Operations per worker
    #[arg(short, long, default_value = "10000")]
    ops: usize,

    /// Largest object size (bytes)
    #[arg(long, default_value = "4096")]
    max_size: usize,

    /// Seed for the workload generator
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Print final statistics as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Keep the file writer alive until exit
    let _guard = setup_logging(&cli)?;

    match cli.command {
        Commands::Classes => classes_command(),
        Commands::Stress(ref args) => stress_command(load_config(&cli)?, args),
        Commands::Config => {
            print!("{}", load_config(&cli)?.to_toml()?);
            Ok(())
        }
        Commands::Version => {
            println!("ztree {}", ztree::VERSION);
            Ok(())
        }
    }
}

/// Setup logging with console output and optional rolling files
fn setup_logging(cli: &Cli) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let log_level = cli
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);

    let (file_layer, guard) = match &cli.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, "ztree.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(!cli.no_color),
        )
        .with(file_layer)
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .init();

    Ok(guard)
}

fn load_config(cli: &Cli) -> anyhow::Result<PoolConfig> {
    Ok(PoolConfig::load(cli.config.as_deref())?)
}

/// Classes command - print the catalog
fn classes_command() -> anyhow::Result<()> {
    println!(
        "{:>5} {:>9} {:>6} {:>6} {:>9} {:>7}",
        "class", "slot", "slots", "pages", "capacity", "used"
    );
    for (index, sc) in SIZE_CLASSES.iter().enumerate() {
        println!(
            "{:>5} {:>9} {:>6} {:>6} {:>9} {:>6.1}%",
            index,
            sc.slot_size,
            sc.slots_per_block,
            sc.units,
            sc.capacity_bytes(),
            sc.capacity_bytes() as f64 / sc.block_bytes() as f64 * 100.0
        );
    }
    Ok(())
}

/// Small xorshift generator so workloads are reproducible per seed
struct Workload(u64);

impl Workload {
    fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn below(&mut self, bound: usize) -> usize {
        (self.next_u64() % bound as u64) as usize
    }
}

#[derive(Default)]
struct Counters {
    allocs: AtomicU64,
    frees: AtomicU64,
    verified: AtomicU64,
    errors: AtomicU64,
}

/// Stress command - churn the pool from many threads, then shrink it
fn stress_command(config: PoolConfig, args: &StressArgs) -> anyhow::Result<()> {
    anyhow::ensure!(args.threads > 0, "--threads must be at least 1");
    anyhow::ensure!(
        (1..=ztree::storage::ztree::MAX_SLOT_SIZE).contains(&args.max_size),
        "--max-size must be between 1 and {}",
        ztree::storage::ztree::MAX_SLOT_SIZE
    );

    let evicted = Arc::new(AtomicU64::new(0));
    let eviction_count = Arc::clone(&evicted);
    let shrink_batch = config.shrink_batch;
    let pool = Pool::with_config(
        config,
        Some(Box::new(move |_: &Pool, _: Handle| -> ztree::error::Result<()> {
            eviction_count.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })),
    )?;

    info!(
        threads = args.threads,
        ops = args.ops,
        max_size = args.max_size,
        "Starting stress workload"
    );
    let counters = Counters::default();
    let start = Instant::now();

    let survivors: Vec<Handle> = (0..args.threads)
        .into_par_iter()
        .flat_map_iter(|worker| {
            run_worker(&pool, &counters, args, args.seed.wrapping_add(worker as u64))
        })
        .collect();

    let elapsed = start.elapsed();
    info!(
        elapsed = ?elapsed,
        allocs = counters.allocs.load(Ordering::Relaxed),
        frees = counters.frees.load(Ordering::Relaxed),
        verified = counters.verified.load(Ordering::Relaxed),
        live = survivors.len(),
        "Churn phase finished"
    );
    let errors = counters.errors.load(Ordering::Relaxed);
    if errors > 0 {
        warn!(errors, "Workload hit allocator errors");
    }

    // Survivors were all written and are unmapped, so every non-hot block is evictable
    let before = pool.pool_size_bytes();
    let mut passes = 0;
    loop {
        let report = pool.shrink(shrink_batch);
        passes += 1;
        if !report.target_met() {
            break;
        }
    }
    info!(
        passes,
        evicted = evicted.load(Ordering::Relaxed),
        bytes_before = before,
        bytes_after = pool.pool_size_bytes(),
        "Shrink phase finished"
    );

    let stats = pool.stats();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!(
            "blocks: {}  used slots: {}  capacity: {} bytes  utilization: {:.1}%",
            stats.total_blocks,
            stats.used_slots,
            stats.capacity_bytes,
            stats.utilization() * 100.0
        );
    }

    pool.destroy();
    Ok(())
}

/// One worker's churn loop; returns the handles it still owns
fn run_worker(pool: &Pool, counters: &Counters, args: &StressArgs, seed: u64) -> Vec<Handle> {
    let mut rng = Workload::new(seed);
    let mut live: Vec<(Handle, u8, usize)> = Vec::new();
    let mut buf = vec![0u8; args.max_size];

    for _ in 0..args.ops {
        match rng.below(3) {
            0 | 1 if live.len() < 4096 => {
                let size = 1 + rng.below(args.max_size);
                let fill = rng.next_u64() as u8;
                match pool.alloc(size, pool.default_ctx()) {
                    Ok(handle) => {
                        if pool.write(handle, &vec![fill; size]).is_err() {
                            counters.errors.fetch_add(1, Ordering::Relaxed);
                        }
                        live.push((handle, fill, size));
                        counters.allocs.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(_) => {
                        counters.errors.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
            2 if !live.is_empty() => {
                let (handle, fill, size) = live.swap_remove(rng.below(live.len()));
                let data = &mut buf[..size];
                if pool.read(handle, data).is_ok() && data.iter().all(|&b| b == fill) {
                    counters.verified.fetch_add(1, Ordering::Relaxed);
                } else {
                    counters.errors.fetch_add(1, Ordering::Relaxed);
                }
                if pool.free(handle).is_ok() {
                    counters.frees.fetch_add(1, Ordering::Relaxed);
                } else {
                    counters.errors.fetch_add(1, Ordering::Relaxed);
                }
            }
            _ => {}
        }
    }

    live.into_iter().map(|(handle, _, _)| handle).collect()
}
