//! Prometheus metrics for ztree pools
//!
//! All pools in a process share one registry. Recording is opt-in per
//! pool through `PoolConfig::metrics`.

use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use std::sync::Once;
use tracing::info;

lazy_static::lazy_static! {
    /// Global metrics registry
    pub static ref METRICS_REGISTRY: Registry = Registry::new();

    pub static ref ALLOCATIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("ztree_allocations_total", "Slots handed out"),
        &["class"]
    ).unwrap();

    pub static ref FREES: IntCounterVec = IntCounterVec::new(
        Opts::new("ztree_frees_total", "Slots freed by clients"),
        &["class"]
    ).unwrap();

    pub static ref EVICTIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("ztree_evictions_total", "Objects evicted by reclaim"),
        &["class"]
    ).unwrap();

    pub static ref EVICTION_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new("ztree_eviction_failures_total", "Evictions declined by the callback"),
        &["class"]
    ).unwrap();

    pub static ref RECLAIM_PASSES: IntCounterVec = IntCounterVec::new(
        Opts::new("ztree_reclaim_passes_total", "Reclaim passes by outcome"),
        &["result"]
    ).unwrap();

    pub static ref BLOCKS: IntGaugeVec = IntGaugeVec::new(
        Opts::new("ztree_blocks", "Live blocks per size class"),
        &["class"]
    ).unwrap();
}

static INIT: Once = Once::new();

/// Register all metrics with the global registry (idempotent)
pub fn init_metrics() {
    INIT.call_once(|| {
        info!("Initializing Prometheus metrics");

        METRICS_REGISTRY.register(Box::new(ALLOCATIONS.clone())).ok();
        METRICS_REGISTRY.register(Box::new(FREES.clone())).ok();
        METRICS_REGISTRY.register(Box::new(EVICTIONS.clone())).ok();
        METRICS_REGISTRY.register(Box::new(EVICTION_FAILURES.clone())).ok();
        METRICS_REGISTRY.register(Box::new(RECLAIM_PASSES.clone())).ok();
        METRICS_REGISTRY.register(Box::new(BLOCKS.clone())).ok();
    });
}

/// Export metrics in Prometheus text format
pub fn export_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = METRICS_REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("UTF-8 conversion error: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ztree::{AllocCtx, Pool};
    use crate::PoolConfig;

    #[test]
    fn test_pool_records_metrics() -> crate::error::Result<()> {
        let config = PoolConfig {
            metrics: true,
            ..PoolConfig::default()
        };
        let pool = Pool::with_config(config, None)?;
        let before = ALLOCATIONS.with_label_values(&["3"]).get();

        let handle = pool.alloc(700, AllocCtx::default())?;
        assert_eq!(handle.class(), 3);
        assert!(ALLOCATIONS.with_label_values(&["3"]).get() > before);
        pool.free(handle)?;

        let text = export_metrics().unwrap();
        assert!(text.contains("ztree_allocations_total"));
        assert!(text.contains("ztree_frees_total"));
        Ok(())
    }
}
