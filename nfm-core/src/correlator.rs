//! Job Device Correlator
//!
//! Joins the job -> node -> device rank table with the per-node fault view.
//! The result is rebuilt from scratch every tick.

use std::collections::HashMap;

use tracing::{debug, error};

use crate::error::FaultError;
use crate::model::{
    AdvanceDeviceFaultCm, DeviceFaultDetail, FaultDeviceView, JobPodFaultDetail,
    JobServerInfoMap, SingleProcessDeviceInfo, SingleProcessJobInfo, SingleProcessNodeInfo,
    INVALID_POD_RANK,
};
use crate::provider::{JobInfoProvider, ReportTimeProvider};

/// Translate a physical rank id into the pod rank owning it
pub fn calculate_pod_rank(rank_id: &str, devices_per_pod: usize) -> Result<i64, FaultError> {
    let invalid = |reason: String| FaultError::InvalidRank {
        rank: rank_id.to_string(),
        devices_per_pod,
        reason,
    };
    if devices_per_pod == 0 {
        return Err(invalid("devices per pod is zero".to_string()));
    }
    let rank: i64 = rank_id
        .trim()
        .parse()
        .map_err(|e: std::num::ParseIntError| invalid(e.to_string()))?;
    if rank < 0 {
        return Err(invalid("rank is negative".to_string()));
    }
    Ok(rank / devices_per_pod as i64)
}

/// Actionable faulted devices of every node, nodes without any are omitted
pub fn fault_devices_of_nodes(
    snapshot: &HashMap<String, AdvanceDeviceFaultCm>,
) -> HashMap<String, HashMap<String, FaultDeviceView>> {
    snapshot
        .iter()
        .filter_map(|(node, cm)| {
            let devices = cm.fault_devices();
            (!devices.is_empty()).then(|| (node.clone(), devices))
        })
        .collect()
}

/// Fold one device's detail into the per-rank aggregate of a job
pub fn update_normal_fault_detail_of_job(
    fault_detail_of_job: &mut HashMap<String, JobPodFaultDetail>,
    job_id: &str,
    pod_rank: &str,
    detail: &DeviceFaultDetail,
) {
    let pods = fault_detail_of_job.entry(job_id.to_string()).or_default();
    match pods.get_mut(pod_rank) {
        Some(existing) => existing.merge(detail),
        None => {
            pods.insert(
                pod_rank.to_string(),
                DeviceFaultDetail {
                    fault_time: detail.fault_time,
                    report_time: detail.report_time,
                    fault_code_level: detail.fault_code_level.clone(),
                    pod_rank_str: pod_rank.to_string(),
                },
            );
        }
    }
}

/// Output of one correlation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Correlation {
    /// job -> node -> faulted device, enrolled jobs with faults only
    pub devices_of_job: HashMap<String, SingleProcessJobInfo>,
    /// job -> pod rank -> aggregated detail
    pub fault_detail_of_job: HashMap<String, JobPodFaultDetail>,
}

/// Correlates jobs enrolled in in-place recovery with faulted devices
pub struct JobDeviceCorrelator<'a> {
    jobs: &'a dyn JobInfoProvider,
    reports: &'a dyn ReportTimeProvider,
}

impl<'a> JobDeviceCorrelator<'a> {
    pub fn new(jobs: &'a dyn JobInfoProvider, reports: &'a dyn ReportTimeProvider) -> Self {
        Self { jobs, reports }
    }

    /// Build the per-job fault view for the current snapshot
    pub fn correlate(
        &self,
        job_server_info_map: &JobServerInfoMap,
        snapshot: &HashMap<String, AdvanceDeviceFaultCm>,
    ) -> Correlation {
        let faulted_nodes = fault_devices_of_nodes(snapshot);
        let mut correlation = Correlation::default();

        for (job_id, servers) in job_server_info_map {
            if !self.jobs.is_restart_in_place_enabled(job_id) {
                continue;
            }
            let devices_per_pod = self.jobs.pod_device_num(job_id);
            let mut job_info = SingleProcessJobInfo {
                job_id: job_id.clone(),
                node: HashMap::new(),
            };

            for (node_name, server) in servers {
                if server.device_list.is_empty() {
                    continue;
                }
                let (Some(faulted), Some(cm)) = (faulted_nodes.get(node_name), snapshot.get(node_name))
                else {
                    continue;
                };

                let mut node_info = SingleProcessNodeInfo {
                    node_name: node_name.clone(),
                    device_info: HashMap::new(),
                };
                for device in &server.device_list {
                    let device_name = cm.device_name(&device.device_id);
                    let Some(view) = faulted.get(&device_name) else {
                        continue;
                    };
                    let pod_rank = match calculate_pod_rank(&device.rank_id, devices_per_pod) {
                        Ok(rank) => rank,
                        Err(e) => {
                            error!(job = %job_id, node = %node_name, error = %e, "Pod rank translation failed");
                            INVALID_POD_RANK
                        }
                    };
                    let pod_rank_str = pod_rank.to_string();
                    let detail = DeviceFaultDetail {
                        fault_time: view.fault_time,
                        report_time: self
                            .reports
                            .single_process_fault_report_time(job_id, &pod_rank_str),
                        fault_code_level: view.fault_code_level.clone(),
                        pod_rank_str: pod_rank_str.clone(),
                    };
                    update_normal_fault_detail_of_job(
                        &mut correlation.fault_detail_of_job,
                        job_id,
                        &pod_rank_str,
                        &detail,
                    );
                    node_info.device_info.insert(
                        device_name.clone(),
                        SingleProcessDeviceInfo {
                            device_id: device.device_id.clone(),
                            device_name,
                            rank_id: device.rank_id.clone(),
                            fault_detail: detail,
                        },
                    );
                }
                if !node_info.device_info.is_empty() {
                    job_info.node.insert(node_name.clone(), node_info);
                }
            }

            if !job_info.node.is_empty() {
                debug!(job = %job_id, nodes = job_info.node.len(), "Job has faulted devices");
                correlation.devices_of_job.insert(job_id.clone(), job_info);
            }
        }
        correlation
    }
}
