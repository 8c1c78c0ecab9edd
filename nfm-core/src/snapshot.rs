//! Snapshot Center
//!
//! One generic reconciliation component per fault domain. Each center owns
//! three independent copies of its per-node state:
//!
//! - `original`: latest truth pushed by the watchers
//! - `processing`: working copy of the current tick, handed to the stages
//! - `processed`: output of the last completed tick, the only view consumers read
//!
//! A tick is debounced by the domain interval. Stages run in registration
//! order; a panicking stage is logged and skipped, the tick always publishes.

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{futures::Notified, watch, Notify};
use tracing::{debug, error, warn};

use crate::error::FaultError;
use crate::metrics::MetricsRegistry;
use crate::model::{AdvanceDeviceFaultCm, NodeInfo, SwitchInfo};

/// Fault domain served by a snapshot center
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaultDomain {
    Device,
    Switch,
    Node,
}

impl FaultDomain {
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultDomain::Device => "device",
            FaultDomain::Switch => "switch",
            FaultDomain::Node => "node",
        }
    }
}

impl fmt::Display for FaultDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-node payload of a fault domain
///
/// `Clone` must produce a fully independent copy.
pub trait FaultSnapshot: Clone + Send + Sync + 'static {
    /// Key of this payload in the snapshot maps
    fn node_name(&self) -> &str;

    /// Equality on fault content, ignoring timestamps
    fn business_eq(&self, other: &Self) -> bool;
}

impl FaultSnapshot for AdvanceDeviceFaultCm {
    fn node_name(&self) -> &str {
        AdvanceDeviceFaultCm::node_name(self)
    }

    fn business_eq(&self, other: &Self) -> bool {
        AdvanceDeviceFaultCm::business_eq(self, other)
    }
}

impl FaultSnapshot for SwitchInfo {
    fn node_name(&self) -> &str {
        SwitchInfo::node_name(self)
    }

    fn business_eq(&self, other: &Self) -> bool {
        SwitchInfo::business_eq(self, other)
    }
}

impl FaultSnapshot for NodeInfo {
    fn node_name(&self) -> &str {
        NodeInfo::node_name(self)
    }

    fn business_eq(&self, other: &Self) -> bool {
        NodeInfo::business_eq(self, other)
    }
}

/// Read-only processor stage
pub trait FaultObserver<T>: Send + Sync {
    fn name(&self) -> &'static str;

    fn observe(&self, snapshot: &HashMap<String, T>);
}

/// Processor stage allowed to mutate the working snapshot
pub trait FaultFilter<T>: Send + Sync {
    fn name(&self) -> &'static str;

    fn filter(&self, snapshot: &mut HashMap<String, T>);
}

/// A registered processor stage
pub enum Stage<T> {
    Observe(Arc<dyn FaultObserver<T>>),
    Filter(Arc<dyn FaultFilter<T>>),
}

impl<T> Stage<T> {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Observe(s) => s.name(),
            Stage::Filter(s) => s.name(),
        }
    }
}

impl<T> Clone for Stage<T> {
    fn clone(&self) -> Self {
        match self {
            Stage::Observe(s) => Stage::Observe(Arc::clone(s)),
            Stage::Filter(s) => Stage::Filter(Arc::clone(s)),
        }
    }
}

/// Three-copy snapshot reconciliation for one fault domain
pub struct SnapshotCenter<T: FaultSnapshot> {
    domain: FaultDomain,
    interval_ms: i64,
    max_nodes: usize,
    original: RwLock<HashMap<String, T>>,
    processing: RwLock<HashMap<String, T>>,
    processed: RwLock<HashMap<String, T>>,
    /// Held for the whole tick so ticks never overlap
    last_process_time: Mutex<Option<i64>>,
    stages: RwLock<Vec<Stage<T>>>,
    generation: watch::Sender<u64>,
    notify: Notify,
    metrics: MetricsRegistry,
}

impl<T: FaultSnapshot> SnapshotCenter<T> {
    /// Create an empty center
    pub fn new(domain: FaultDomain, interval: Duration, max_nodes: usize) -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            domain,
            interval_ms: interval.as_millis() as i64,
            max_nodes,
            original: RwLock::new(HashMap::new()),
            processing: RwLock::new(HashMap::new()),
            processed: RwLock::new(HashMap::new()),
            last_process_time: Mutex::new(None),
            stages: RwLock::new(Vec::new()),
            generation,
            notify: Notify::new(),
            metrics: MetricsRegistry::new(),
        }
    }

    pub fn domain(&self) -> FaultDomain {
        self.domain
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms as u64)
    }

    /// Append a stage to the processor chain
    pub fn register(&self, stage: Stage<T>) {
        debug!(domain = %self.domain, stage = stage.name(), "Registered processor stage");
        self.stages.write().push(stage);
    }

    /// Insert or replace the original payload of a node
    ///
    /// Returns whether the fault content changed. A new node key is rejected
    /// when the snapshot already holds `max_nodes` nodes.
    pub fn update_original(&self, new: T) -> Result<bool, FaultError> {
        let key = new.node_name().to_string();
        let changed = {
            let mut original = self.original.write();
            if original.len() >= self.max_nodes && !original.contains_key(&key) {
                let err = FaultError::CapacityExceeded {
                    domain: self.domain,
                    node: key,
                    len: original.len(),
                    limit: self.max_nodes,
                };
                warn!(domain = %self.domain, error = %err, "Rejected snapshot update");
                self.metrics.inc_rejected_update(self.domain);
                return Err(err);
            }
            let changed = match original.get(&key) {
                Some(old) => !old.business_eq(&new),
                None => true,
            };
            original.insert(key.clone(), new);
            self.metrics.set_snapshot_nodes(self.domain, original.len());
            changed
        };

        if changed {
            debug!(domain = %self.domain, node = %key, "Original snapshot changed");
            self.notify.notify_one();
        }
        Ok(changed)
    }

    /// Remove a node's original payload
    pub fn delete_original(&self, node: &str) -> bool {
        let removed = {
            let mut original = self.original.write();
            let removed = original.remove(node).is_some();
            self.metrics.set_snapshot_nodes(self.domain, original.len());
            removed
        };
        if removed {
            debug!(domain = %self.domain, node = %node, "Original snapshot deleted");
            self.notify.notify_one();
        }
        removed
    }

    /// Run one tick using the wall clock
    pub fn process(&self) -> bool {
        self.process_at(chrono::Utc::now().timestamp_millis())
    }

    /// Run one tick as of `now_ms`
    ///
    /// Returns false when debounced.
    pub fn process_at(&self, now_ms: i64) -> bool {
        let mut last = self.last_process_time.lock();
        if let Some(last_ms) = *last {
            if now_ms - last_ms < self.interval_ms {
                return false;
            }
        }
        *last = Some(now_ms);

        let start = Instant::now();
        let stages = self.stages.read().clone();

        *self.processing.write() = self.original.read().clone();
        {
            let mut processing = self.processing.write();
            for stage in &stages {
                self.run_stage(stage, &mut processing);
            }
            *self.processed.write() = processing.clone();
        }

        self.generation.send_modify(|g| *g += 1);
        self.metrics.observe_tick(self.domain, start.elapsed().as_secs_f64());
        debug!(domain = %self.domain, duration = ?start.elapsed(), "Snapshot tick complete");
        true
    }

    fn run_stage(&self, stage: &Stage<T>, snapshot: &mut HashMap<String, T>) {
        let result = match stage {
            Stage::Observe(observer) => {
                let view: &HashMap<String, T> = snapshot;
                catch_unwind(AssertUnwindSafe(|| observer.observe(view)))
            }
            Stage::Filter(filter) => catch_unwind(AssertUnwindSafe(|| filter.filter(snapshot))),
        };
        if result.is_err() {
            error!(domain = %self.domain, stage = stage.name(), "Processor stage panicked");
            self.metrics.inc_stage_panic(self.domain, stage.name());
        }
    }

    /// Copy of the last completed tick's output
    pub fn get_processed(&self) -> HashMap<String, T> {
        self.processed.read().clone()
    }

    /// Copy of one node from the last completed tick's output
    pub fn get_processed_node(&self, node: &str) -> Option<T> {
        self.processed.read().get(node).cloned()
    }

    /// Copy of the latest original payloads
    pub fn get_original(&self) -> HashMap<String, T> {
        self.original.read().clone()
    }

    /// Copy of the current working snapshot
    pub fn get_processing(&self) -> HashMap<String, T> {
        self.processing.read().clone()
    }

    /// Node keys of the original snapshot
    pub fn original_nodes(&self) -> Vec<String> {
        self.original.read().keys().cloned().collect()
    }

    pub fn original_len(&self) -> usize {
        self.original.read().len()
    }

    /// Receiver of the completed tick counter
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }

    /// Completes when an update changed the original snapshot
    pub fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }

    /// Wake the driving loop for this domain
    pub fn notify(&self) {
        self.notify.notify_one();
    }
}
