//! Job rank fault visibility
//!
//! Flattens the raw (unfiltered) device snapshot into a per-job list of
//! `(rank, fault code)` pairs and derives a coarse job health from it and
//! from the processed switch and node snapshots.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, error};

use crate::correlator::calculate_pod_rank;
use crate::model::{
    AdvanceDeviceFaultCm, FaultRank, HealthyState, JobFaultInfo, NodeInfo, ServerHccl, SwitchInfo,
    SUB_HEALTHY_STATE, UNHEALTHY_STATE,
};
use crate::provider::JobInfoProvider;
use crate::snapshot::{FaultObserver, SnapshotCenter};
use crate::taxonomy::FaultLevel;

/// Per-job raw fault list builder of the device domain
pub struct JobRankFaultInfoProcessor {
    jobs: Arc<dyn JobInfoProvider>,
    switches: Arc<SnapshotCenter<SwitchInfo>>,
    nodes: Arc<SnapshotCenter<NodeInfo>>,
    job_fault_info: RwLock<HashMap<String, JobFaultInfo>>,
}

impl JobRankFaultInfoProcessor {
    pub fn new(
        jobs: Arc<dyn JobInfoProvider>,
        switches: Arc<SnapshotCenter<SwitchInfo>>,
        nodes: Arc<SnapshotCenter<NodeInfo>>,
    ) -> Self {
        Self {
            jobs,
            switches,
            nodes,
            job_fault_info: RwLock::new(HashMap::new()),
        }
    }

    /// Copy of the last built job fault lists
    pub fn job_fault_rank_infos(&self) -> HashMap<String, JobFaultInfo> {
        self.job_fault_info.read().clone()
    }

    /// Job fault lists without the entries of one level
    pub fn job_fault_rank_infos_filter_level(&self, level: &str) -> HashMap<String, JobFaultInfo> {
        let mut infos = self.job_fault_rank_infos();
        for info in infos.values_mut() {
            info.fault_list.retain(|f| f.fault_level != level);
        }
        infos
    }

    /// Rebuild the job fault lists from a device snapshot
    pub fn rebuild(&self, devices: &HashMap<String, AdvanceDeviceFaultCm>) {
        let switches = self.switches.get_processed();
        let nodes = self.nodes.get_processed();

        let mut infos = HashMap::new();
        for (job_id, servers) in self.jobs.job_server_info_map() {
            let devices_per_pod = self.jobs.pod_device_num(&job_id);
            let mut fault_list = Vec::new();
            let mut node_status = Vec::new();

            for (node_name, server) in &servers {
                let switch = switches.get(node_name);
                if let Some(switch) = switch {
                    node_status.push(switch.node_status.clone());
                }
                if switch.map(SwitchInfo::is_unhealthy).unwrap_or(false) {
                    debug!(job = %job_id, node = %node_name, "Switch of node is unhealthy");
                    fault_list.extend(separate_all_ranks(&job_id, server, devices_per_pod));
                    continue;
                }
                if nodes.get(node_name).map(NodeInfo::is_unhealthy).unwrap_or(false) {
                    debug!(job = %job_id, node = %node_name, "Node is unhealthy");
                    fault_list.extend(separate_all_ranks(&job_id, server, devices_per_pod));
                    continue;
                }
                if let Some(cm) = devices.get(node_name) {
                    fault_list.extend(device_fault_ranks(&job_id, cm, server, devices_per_pod));
                }
            }

            let healthy_state = health_state(&fault_list, &node_status);
            infos.insert(
                job_id.clone(),
                JobFaultInfo {
                    job_id,
                    fault_list,
                    healthy_state,
                },
            );
        }
        *self.job_fault_info.write() = infos;
    }
}

impl FaultObserver<AdvanceDeviceFaultCm> for JobRankFaultInfoProcessor {
    fn name(&self) -> &'static str {
        "job-rank-fault-info"
    }

    fn observe(&self, snapshot: &HashMap<String, AdvanceDeviceFaultCm>) {
        self.rebuild(snapshot);
    }
}

fn device_fault_ranks(
    job_id: &str,
    cm: &AdvanceDeviceFaultCm,
    server: &ServerHccl,
    devices_per_pod: usize,
) -> Vec<FaultRank> {
    let mut ranks = Vec::new();
    for device in &server.device_list {
        let Some(faults) = cm.fault_device_list.get(&cm.device_name(&device.device_id)) else {
            continue;
        };
        let pod_rank = match calculate_pod_rank(&device.rank_id, devices_per_pod) {
            Ok(rank) => rank.to_string(),
            Err(e) => {
                error!(job = %job_id, error = %e, "Pod rank translation failed");
                String::new()
            }
        };
        ranks.extend(faults.iter().map(|fault| FaultRank {
            rank_id: device.rank_id.clone(),
            pod_rank: pod_rank.clone(),
            fault_code: fault.fault_code.clone(),
            fault_level: fault.fault_level.clone(),
        }));
    }
    ranks
}

/// Every rank of the job on a lost node, marked for separation
fn separate_all_ranks(job_id: &str, server: &ServerHccl, devices_per_pod: usize) -> Vec<FaultRank> {
    server
        .device_list
        .iter()
        .filter_map(|device| match calculate_pod_rank(&device.rank_id, devices_per_pod) {
            Ok(rank) => Some(FaultRank {
                rank_id: device.rank_id.clone(),
                pod_rank: rank.to_string(),
                fault_code: String::new(),
                fault_level: FaultLevel::SeparateNPU.to_string(),
            }),
            Err(e) => {
                error!(job = %job_id, error = %e, "Pod rank translation failed");
                None
            }
        })
        .collect()
}

fn health_state(fault_list: &[FaultRank], node_status: &[String]) -> HealthyState {
    let mut sub_healthy = false;
    for fault in fault_list {
        match fault.fault_level.parse::<FaultLevel>() {
            Ok(FaultLevel::NotHandleFault) => {}
            Ok(FaultLevel::SubHealthFault) => sub_healthy = true,
            _ => return HealthyState::UnHealthy,
        }
    }
    for status in node_status {
        if status == UNHEALTHY_STATE {
            return HealthyState::UnHealthy;
        }
        if status == SUB_HEALTHY_STATE {
            sub_healthy = true;
        }
    }
    if sub_healthy {
        HealthyState::SubHealthy
    } else {
        HealthyState::Healthy
    }
}
