//! Prometheus metrics for the driver controller.

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};

/// Controller metrics, registered on a private registry
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub reconcile_total: IntCounterVec,
    pub reconcile_duration: Histogram,
    pub node_pools: IntGaugeVec,
    pub stale_daemonsets_deleted: IntCounter,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let reconcile_total = IntCounterVec::new(
            Opts::new("nvidia_driver_reconcile_total", "Reconciliation passes by result"),
            &["result"],
        )?;
        let reconcile_duration = Histogram::with_opts(HistogramOpts::new(
            "nvidia_driver_reconcile_duration_seconds",
            "Duration of reconciliation passes",
        ))?;
        let node_pools = IntGaugeVec::new(
            Opts::new("nvidia_driver_node_pools", "Node pools computed for an NVIDIADriver"),
            &["driver"],
        )?;
        let stale_daemonsets_deleted = IntCounter::new(
            "nvidia_driver_stale_daemonsets_deleted_total",
            "Driver DaemonSets deleted because their pool no longer exists",
        )?;

        registry.register(Box::new(reconcile_total.clone()))?;
        registry.register(Box::new(reconcile_duration.clone()))?;
        registry.register(Box::new(node_pools.clone()))?;
        registry.register(Box::new(stale_daemonsets_deleted.clone()))?;

        Ok(Self {
            registry,
            reconcile_total,
            reconcile_duration,
            node_pools,
            stale_daemonsets_deleted,
        })
    }

    /// Metrics in the Prometheus text exposition format
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }
}
