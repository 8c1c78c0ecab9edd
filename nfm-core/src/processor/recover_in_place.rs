//! Recover-in-place filtering
//!
//! For every job enrolled in in-place recovery, decides per pod rank whether
//! its L2/L3 device faults may be hidden from the escalation path, and removes
//! them from the working device snapshot when they may.
//!
//! A rank is eligible only when:
//! - every fault level on it is recoverable in place under the job's strategy
//! - the workload has not acknowledged a fault newer than the current one
//! - the fault is younger than the restart-in-place window
//!
//! The master rank gates the whole job: if pod rank 0 is faulted and not
//! eligible, no other rank of the job is filtered either.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::correlator::{Correlation, JobDeviceCorrelator};
use crate::metrics::MetricsRegistry;
use crate::model::{
    AdvanceDeviceFaultCm, DeviceFault, DeviceFaultDetail, INVALID_POD_RANK, MASTER_POD_RANK,
};
use crate::provider::{JobInfoProvider, ReportTimeProvider};
use crate::snapshot::FaultFilter;
use crate::taxonomy::{
    fault_levels_has_npu_fault, is_l2_l3_fault, is_recover_in_place_fault_levels, SubHealthStrategy,
};

/// Why a rank's faults cannot be filtered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterRejection {
    JobNoFault,
    RankParseError,
    /// The master rank failed the single-rank test
    MasterRank(Box<FilterRejection>),
    PodRankNoFault,
    OtherFault,
    ShouldReport,
    FaultTimedOut,
}

impl fmt::Display for FilterRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterRejection::JobNoFault => write!(f, "job has no fault"),
            FilterRejection::RankParseError => write!(f, "rank parse error"),
            FilterRejection::MasterRank(inner) => write!(f, "podRank0 {}", inner),
            FilterRejection::PodRankNoFault => write!(f, "podRank has no fault"),
            FilterRejection::OtherFault => write!(f, "other fault present"),
            FilterRejection::ShouldReport => write!(f, "should report"),
            FilterRejection::FaultTimedOut => write!(f, "fault timed out"),
        }
    }
}

fn levels_of(detail: &DeviceFaultDetail) -> HashSet<&str> {
    detail.fault_code_level.values().map(String::as_str).collect()
}

/// Single-rank eligibility test
pub fn fault_detail_can_do_restart_in_place(
    detail: &DeviceFaultDetail,
    now_ms: i64,
    strategy: SubHealthStrategy,
    timeout: Duration,
) -> Result<(), FilterRejection> {
    if !is_recover_in_place_fault_levels(&levels_of(detail), strategy) {
        return Err(FilterRejection::OtherFault);
    }
    if detail.has_report() && detail.report_time > detail.fault_time {
        return Err(FilterRejection::ShouldReport);
    }
    if detail.fault_time < now_ms - timeout.as_millis() as i64 {
        return Err(FilterRejection::FaultTimedOut);
    }
    Ok(())
}

/// In-place recovery filter of the device domain
pub struct RecoverInPlaceProcessor {
    jobs: Arc<dyn JobInfoProvider>,
    reports: Arc<dyn ReportTimeProvider>,
    timeout: Duration,
    state: RwLock<Correlation>,
    metrics: MetricsRegistry,
}

impl RecoverInPlaceProcessor {
    pub fn new(
        jobs: Arc<dyn JobInfoProvider>,
        reports: Arc<dyn ReportTimeProvider>,
        timeout: Duration,
    ) -> Self {
        Self {
            jobs,
            reports,
            timeout,
            state: RwLock::new(Correlation::default()),
            metrics: MetricsRegistry::new(),
        }
    }

    /// Run one pass over an owned snapshot and hand it back
    pub fn process(
        &self,
        mut content: HashMap<String, AdvanceDeviceFaultCm>,
    ) -> HashMap<String, AdvanceDeviceFaultCm> {
        self.filter_at(&mut content, chrono::Utc::now().timestamp_millis());
        content
    }

    /// Rebuild the correlation and filter eligible faults as of `now_ms`
    pub fn filter_at(&self, snapshot: &mut HashMap<String, AdvanceDeviceFaultCm>, now_ms: i64) {
        let job_server_info_map = self.jobs.job_server_info_map();
        let correlation = JobDeviceCorrelator::new(self.jobs.as_ref(), self.reports.as_ref())
            .correlate(&job_server_info_map, snapshot);

        let mut nodes: Vec<&String> = snapshot.keys().collect();
        nodes.sort();
        let nodes: Vec<String> = nodes.into_iter().cloned().collect();

        let mut filtered = 0u64;
        for node_name in &nodes {
            let Some(cm) = snapshot.get_mut(node_name) else {
                continue;
            };
            filtered += self.filter_node(&correlation, node_name, cm, now_ms);
        }
        if filtered > 0 {
            self.metrics.inc_filtered_faults(filtered);
        }

        *self.state.write() = correlation;
    }

    fn filter_node(
        &self,
        correlation: &Correlation,
        node_name: &str,
        cm: &mut AdvanceDeviceFaultCm,
        now_ms: i64,
    ) -> u64 {
        let mut removed = 0u64;
        let mut modified = false;
        for (job_id, job_info) in &correlation.devices_of_job {
            if !self.jobs.is_restart_in_place_enabled(job_id) {
                continue;
            }
            let Some(fault_node) = job_info.node.get(node_name) else {
                continue;
            };
            let strategy = self.jobs.sub_health_strategy(job_id);
            for (device_name, device) in &fault_node.device_info {
                let detail = &device.fault_detail;
                let verdict = can_filter(
                    correlation,
                    job_id,
                    &detail.pod_rank_str,
                    now_ms,
                    strategy,
                    self.timeout,
                );
                match verdict {
                    Ok(()) => {
                        let count = filter_normal_device_fault_info(device_name, cm);
                        info!(
                            job = %job_id,
                            node = %node_name,
                            device = %device_name,
                            fault_time = detail.fault_time,
                            removed = count,
                            "Filtered recoverable faults"
                        );
                        removed += count;
                        modified = true;
                    }
                    Err(reason) => {
                        warn!(
                            job = %job_id,
                            node = %node_name,
                            device = %device_name,
                            fault_time = detail.fault_time,
                            reason = %reason,
                            "Cannot filter faults"
                        );
                    }
                }
            }
        }
        if modified {
            cm.update_time = now_ms / 1000;
            cm.sort_data();
        }
        removed
    }

    /// Eligibility of one pod rank of a job, as of `now_ms`
    pub fn can_filter_normal_device_fault_info(
        &self,
        job_id: &str,
        pod_rank: &str,
        now_ms: i64,
        strategy: SubHealthStrategy,
    ) -> Result<(), FilterRejection> {
        can_filter(&self.state.read(), job_id, pod_rank, now_ms, strategy, self.timeout)
    }

    /// Whether the rank can currently restart in place
    pub fn can_do_restart_in_place(&self, job_id: &str, pod_rank: &str) -> bool {
        let strategy = self.jobs.sub_health_strategy(job_id);
        self.can_filter_normal_device_fault_info(
            job_id,
            pod_rank,
            chrono::Utc::now().timestamp_millis(),
            strategy,
        )
        .is_ok()
    }

    /// Code to level map recorded for a job's device in the last pass
    pub fn filter_fault_code_and_level(
        &self,
        job_id: &str,
        node_name: &str,
        device_name: &str,
    ) -> Option<HashMap<String, String>> {
        let state = self.state.read();
        let device = state
            .devices_of_job
            .get(job_id)?
            .node
            .get(node_name)?
            .device_info
            .get(device_name);
        match device {
            Some(d) => Some(d.fault_detail.fault_code_level.clone()),
            None => {
                debug!(job = %job_id, node = %node_name, device = %device_name, "No fault recorded for device");
                None
            }
        }
    }

    /// Pod ranks still holding NPU faults, and whether no recoverable fault remains
    pub fn job_unrecovered_pod_ranks(
        &self,
        job_id: &str,
        strategy: SubHealthStrategy,
    ) -> (Vec<String>, bool) {
        let state = self.state.read();
        let Some(pods) = state.fault_detail_of_job.get(job_id) else {
            return (Vec::new(), true);
        };
        let mut unrecovered = Vec::new();
        let mut done = true;
        for (pod_rank, detail) in pods {
            let levels = levels_of(detail);
            if is_recover_in_place_fault_levels(&levels, strategy) {
                info!(job = %job_id, pod_rank = %pod_rank, "Pod rank has recoverable fault");
                done = false;
            }
            if fault_levels_has_npu_fault(&levels, strategy) {
                info!(job = %job_id, pod_rank = %pod_rank, "Pod rank has NPU fault");
                unrecovered.push(pod_rank.clone());
            }
        }
        unrecovered.sort_by_key(|r| r.parse::<i64>().unwrap_or(i64::MAX));
        (unrecovered, done)
    }

    /// Per pod rank details of a job from the last pass
    pub fn fault_detail_of_job(&self, job_id: &str) -> Option<HashMap<String, DeviceFaultDetail>> {
        self.state.read().fault_detail_of_job.get(job_id).cloned()
    }
}

impl FaultFilter<AdvanceDeviceFaultCm> for RecoverInPlaceProcessor {
    fn name(&self) -> &'static str {
        "recover-in-place"
    }

    fn filter(&self, snapshot: &mut HashMap<String, AdvanceDeviceFaultCm>) {
        self.filter_at(snapshot, chrono::Utc::now().timestamp_millis());
    }
}

fn can_filter(
    correlation: &Correlation,
    job_id: &str,
    pod_rank: &str,
    now_ms: i64,
    strategy: SubHealthStrategy,
    timeout: Duration,
) -> Result<(), FilterRejection> {
    let pods = correlation
        .fault_detail_of_job
        .get(job_id)
        .ok_or(FilterRejection::JobNoFault)?;
    if pods.contains_key(&INVALID_POD_RANK.to_string()) {
        return Err(FilterRejection::RankParseError);
    }
    if let Some(master) = pods.get(MASTER_POD_RANK) {
        fault_detail_can_do_restart_in_place(master, now_ms, strategy, timeout)
            .map_err(|e| FilterRejection::MasterRank(Box::new(e)))?;
    }
    let detail = pods.get(pod_rank).ok_or(FilterRejection::PodRankNoFault)?;
    fault_detail_can_do_restart_in_place(detail, now_ms, strategy, timeout)
}

/// Remove every L2/L3 fault of a device, returning how many were removed
fn filter_normal_device_fault_info(device_name: &str, cm: &mut AdvanceDeviceFaultCm) -> u64 {
    let targets: Vec<DeviceFault> = cm
        .fault_device_list
        .get(device_name)
        .map(|faults| {
            faults
                .iter()
                .filter(|f| is_l2_l3_fault(&f.fault_level))
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    targets
        .iter()
        .filter(|fault| cm.del_fault_and_fix(device_name, fault))
        .count() as u64
}
