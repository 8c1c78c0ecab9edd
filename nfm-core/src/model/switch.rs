//! Switch fault domain payload

use serde::{Deserialize, Serialize};

/// Name prefix of switch info ConfigMaps
pub const SWITCH_INFO_PREFIX: &str = "mindx-dl-switchinfo-";

/// Node status string reported for a faulted node
pub const UNHEALTHY_STATE: &str = "UnHealthy";

/// Node status string reported for a healthy node
pub const HEALTHY_STATE: &str = "Healthy";

/// Node status string reported for a sub-healthy node
pub const SUB_HEALTHY_STATE: &str = "SubHealthy";

/// One switch port fault
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchFaultInfo {
    #[serde(rename = "AssembledFaultCode", default)]
    pub assembled_fault_code: String,
    #[serde(rename = "SwitchChipId", default)]
    pub switch_chip_id: u32,
    #[serde(rename = "SwitchPortId", default)]
    pub switch_port_id: u32,
    #[serde(rename = "FaultLevel", default)]
    pub fault_level: String,
    #[serde(rename = "FaultTime", default)]
    pub fault_time: i64,
}

/// Switch fault state of one node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchInfo {
    #[serde(rename = "CmName", default)]
    pub cm_name: String,
    #[serde(rename = "FaultLevel", default)]
    pub fault_level: String,
    #[serde(rename = "NodeStatus", default)]
    pub node_status: String,
    #[serde(rename = "FaultInfo", default)]
    pub fault_info: Vec<SwitchFaultInfo>,
    #[serde(rename = "UpdateTime", default)]
    pub update_time: i64,
}

impl SwitchInfo {
    pub fn node_name(&self) -> &str {
        self.cm_name
            .strip_prefix(SWITCH_INFO_PREFIX)
            .unwrap_or(&self.cm_name)
    }

    pub fn is_unhealthy(&self) -> bool {
        self.node_status == UNHEALTHY_STATE
    }

    /// Equality on everything except the update time
    pub fn business_eq(&self, other: &Self) -> bool {
        self.cm_name == other.cm_name
            && self.fault_level == other.fault_level
            && self.node_status == other.node_status
            && self.fault_info == other.fault_info
    }
}
