//! Prometheus metrics
//!
//! Counters are process-global. `init_metrics` registers them with
//! `METRICS_REGISTRY`; `gather` renders the registry in text format.

use crate::error::{Error, Result};
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use tracing::info;

lazy_static::lazy_static! {
    /// Global metrics registry
    pub static ref METRICS_REGISTRY: Registry = Registry::new();

    // Range queries
    pub static ref RGET_TOTAL: IntCounter = IntCounter::new(
        "photonkv_rget_total",
        "Total range queries"
    ).unwrap();

    pub static ref RGET_ENTRIES: IntCounter = IntCounter::new(
        "photonkv_rget_entries_total",
        "Total entries returned by range queries"
    ).unwrap();

    // Protocol
    pub static ref OPERATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("photonkv_operations_total", "Total dispatched operations"),
        &["kind", "command"]
    ).unwrap();

    pub static ref OPERATION_ERRORS: IntCounterVec = IntCounterVec::new(
        Opts::new("photonkv_operation_errors_total", "Operations that failed"),
        &["command"]
    ).unwrap();

    // B-tree
    pub static ref NODE_LOCKS_HELD: IntGauge = IntGauge::new(
        "photonkv_node_locks_held",
        "Node locks currently held across all slices"
    ).unwrap();
}

/// Initialize metrics registry
pub fn init_metrics() {
    info!("Initializing Prometheus metrics");

    METRICS_REGISTRY.register(Box::new(RGET_TOTAL.clone())).ok();
    METRICS_REGISTRY.register(Box::new(RGET_ENTRIES.clone())).ok();
    METRICS_REGISTRY.register(Box::new(OPERATIONS_TOTAL.clone())).ok();
    METRICS_REGISTRY.register(Box::new(OPERATION_ERRORS.clone())).ok();
    METRICS_REGISTRY.register(Box::new(NODE_LOCKS_HELD.clone())).ok();
}

/// Render every registered metric in the Prometheus text format.
pub fn gather() -> Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&METRICS_REGISTRY.gather(), &mut buffer)
        .map_err(|e| Error::Internal(format!("failed to encode metrics: {}", e)))?;
    String::from_utf8(buffer).map_err(|e| Error::Internal(format!("metrics are not UTF-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_after_init() {
        init_metrics();
        // Registering twice is harmless.
        init_metrics();
        RGET_TOTAL.inc();
        OPERATIONS_TOTAL.with_label_values(&["read", "GET"]).inc();

        let text = gather().unwrap();
        assert!(text.contains("photonkv_rget_total"));
        assert!(text.contains("photonkv_operations_total"));
    }
}
