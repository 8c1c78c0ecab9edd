//! Prometheus metrics for NFM

use once_cell::sync::Lazy;
use prometheus::{
    opts, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge_vec, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec,
};

use crate::snapshot::FaultDomain;

/// Number of nodes cached per fault domain
static SNAPSHOT_NODES: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        opts!("nfm_snapshot_nodes", "Number of nodes in the original snapshot"),
        &["domain"]
    )
    .expect("Failed to create snapshot_nodes metric")
});

/// Completed reconciliation ticks
static PROCESS_TICKS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!("nfm_process_ticks_total", "Total number of reconciliation ticks"),
        &["domain"]
    )
    .expect("Failed to create process_ticks metric")
});

/// Reconciliation tick duration histogram
static PROCESS_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "nfm_process_duration_seconds",
        "Duration of reconciliation ticks",
        &["domain"],
        vec![0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to create process_duration metric")
});

/// Updates rejected by the capacity ceiling
static REJECTED_UPDATES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!("nfm_rejected_updates_total", "Total number of rejected snapshot updates"),
        &["domain"]
    )
    .expect("Failed to create rejected_updates metric")
});

/// Faults removed by in-place recovery filtering
static FILTERED_FAULTS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "nfm_filtered_faults_total",
        "Total number of faults filtered for in-place recovery"
    ))
    .expect("Failed to create filtered_faults metric")
});

/// Processor stages that panicked
static STAGE_PANICS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!("nfm_stage_panics_total", "Total number of panicking processor stages"),
        &["domain", "stage"]
    )
    .expect("Failed to create stage_panics metric")
});

/// Metrics registry wrapper
#[derive(Debug, Clone, Copy)]
pub struct MetricsRegistry;

impl MetricsRegistry {
    /// Create a new metrics registry
    pub fn new() -> Self {
        // Force initialization of lazy statics
        let _ = &*SNAPSHOT_NODES;
        let _ = &*PROCESS_TICKS;
        let _ = &*PROCESS_DURATION;
        let _ = &*REJECTED_UPDATES;
        let _ = &*FILTERED_FAULTS;
        let _ = &*STAGE_PANICS;
        Self
    }

    pub fn set_snapshot_nodes(&self, domain: FaultDomain, count: usize) {
        SNAPSHOT_NODES
            .with_label_values(&[domain.as_str()])
            .set(count as i64);
    }

    /// Record one completed tick
    pub fn observe_tick(&self, domain: FaultDomain, duration_secs: f64) {
        PROCESS_TICKS.with_label_values(&[domain.as_str()]).inc();
        PROCESS_DURATION
            .with_label_values(&[domain.as_str()])
            .observe(duration_secs);
    }

    pub fn inc_rejected_update(&self, domain: FaultDomain) {
        REJECTED_UPDATES.with_label_values(&[domain.as_str()]).inc();
    }

    pub fn inc_filtered_faults(&self, count: u64) {
        FILTERED_FAULTS.inc_by(count);
    }

    pub fn inc_stage_panic(&self, domain: FaultDomain, stage: &str) {
        STAGE_PANICS
            .with_label_values(&[domain.as_str(), stage])
            .inc();
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
