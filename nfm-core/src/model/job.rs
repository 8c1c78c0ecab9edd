//! Job placement and per-rank fault aggregates

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Report time meaning the workload has not acknowledged any fault yet
pub const JOB_SHOULD_REPORT_FAULT: i64 = i64::MAX;

/// Pod rank recorded when a rank id cannot be translated
pub const INVALID_POD_RANK: i64 = -1;

/// Pod rank of the master replica
pub const MASTER_POD_RANK: &str = "0";

/// One device of a job on a server
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    #[serde(rename = "DeviceID", default)]
    pub device_id: String,
    #[serde(rename = "RankID", default)]
    pub rank_id: String,
}

/// Devices a job occupies on one server
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerHccl {
    #[serde(rename = "DeviceList", default)]
    pub device_list: Vec<Device>,
}

/// job id -> node name -> devices
pub type JobServerInfoMap = HashMap<String, HashMap<String, ServerHccl>>;

/// Aggregated fault state of one (job, pod rank)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceFaultDetail {
    pub fault_time: i64,
    pub report_time: i64,
    /// Fault code to level
    pub fault_code_level: HashMap<String, String>,
    pub pod_rank_str: String,
}

impl DeviceFaultDetail {
    pub fn has_report(&self) -> bool {
        self.report_time != JOB_SHOULD_REPORT_FAULT
    }

    /// Fold another detail of the same rank into this one
    ///
    /// Times take the minimum; codes already present keep their level.
    pub fn merge(&mut self, other: &DeviceFaultDetail) {
        self.fault_time = self.fault_time.min(other.fault_time);
        self.report_time = self.report_time.min(other.report_time);
        for (code, level) in &other.fault_code_level {
            self.fault_code_level
                .entry(code.clone())
                .or_insert_with(|| level.clone());
        }
    }
}

/// Per pod rank details of one job
pub type JobPodFaultDetail = HashMap<String, DeviceFaultDetail>;

/// A faulted device of a job enrolled in in-place recovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SingleProcessDeviceInfo {
    pub device_id: String,
    pub device_name: String,
    pub rank_id: String,
    pub fault_detail: DeviceFaultDetail,
}

/// Faulted devices of a job on one node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SingleProcessNodeInfo {
    pub node_name: String,
    /// Device name to device
    pub device_info: HashMap<String, SingleProcessDeviceInfo>,
}

/// Faulted nodes of one job
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SingleProcessJobInfo {
    pub job_id: String,
    /// Node name to node
    pub node: HashMap<String, SingleProcessNodeInfo>,
}

/// One faulted rank of a job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultRank {
    #[serde(rename = "RankId")]
    pub rank_id: String,
    #[serde(rename = "PodRank")]
    pub pod_rank: String,
    #[serde(rename = "FaultCode")]
    pub fault_code: String,
    #[serde(rename = "FaultLevel")]
    pub fault_level: String,
}

/// Coarse health of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum HealthyState {
    #[default]
    Healthy,
    SubHealthy,
    UnHealthy,
}

impl fmt::Display for HealthyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthyState::Healthy => write!(f, "Healthy"),
            HealthyState::SubHealthy => write!(f, "SubHealthy"),
            HealthyState::UnHealthy => write!(f, "UnHealthy"),
        }
    }
}

/// Raw fault visibility of one job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFaultInfo {
    #[serde(rename = "JobId")]
    pub job_id: String,
    #[serde(rename = "FaultList")]
    pub fault_list: Vec<FaultRank>,
    #[serde(rename = "HealthyState")]
    pub healthy_state: HealthyState,
}
