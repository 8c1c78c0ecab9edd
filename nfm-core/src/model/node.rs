//! Node fault domain payload

use serde::{Deserialize, Serialize};

use super::switch::UNHEALTHY_STATE;

/// Name prefix of node info ConfigMaps
pub const NODE_INFO_PREFIX: &str = "mindx-dl-nodeinfo-";

/// Fault reported on a non-NPU node component
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultDev {
    #[serde(rename = "DeviceType", default)]
    pub device_type: String,
    #[serde(rename = "DeviceId", default)]
    pub device_id: i64,
    #[serde(rename = "FaultCode", default)]
    pub fault_code: Vec<String>,
    #[serde(rename = "FaultLevel", default)]
    pub fault_level: String,
}

/// Node fault state of one node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    #[serde(rename = "CmName", default)]
    pub cm_name: String,
    #[serde(rename = "NodeStatus", default)]
    pub node_status: String,
    #[serde(rename = "FaultDevList", default)]
    pub fault_dev_list: Vec<FaultDev>,
    #[serde(rename = "UpdateTime", default)]
    pub update_time: i64,
}

impl NodeInfo {
    pub fn node_name(&self) -> &str {
        self.cm_name
            .strip_prefix(NODE_INFO_PREFIX)
            .unwrap_or(&self.cm_name)
    }

    pub fn is_unhealthy(&self) -> bool {
        self.node_status == UNHEALTHY_STATE
    }

    pub fn business_eq(&self, other: &Self) -> bool {
        self.cm_name == other.cm_name
            && self.node_status == other.node_status
            && self.fault_dev_list == other.fault_dev_list
    }
}
