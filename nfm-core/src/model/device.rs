//! Device fault domain payloads
//!
//! `RawDeviceInfo` is what the device plugin publishes per node;
//! `AdvanceDeviceFaultCm` is the normalized per-node view the device
//! snapshot center works on.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::taxonomy::is_card_unhealthy_level;

/// Name prefix of device info ConfigMaps
pub const DEVICE_INFO_PREFIX: &str = "mindx-dl-deviceinfo-";

/// Fault type of a card network fault
pub const CARD_NETWORK_UNHEALTHY: &str = "CardNetworkUnhealthy";

/// First-seen time and level of one fault code
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FaultTimeAndLevel {
    #[serde(rename = "FaultTime", default)]
    pub fault_time: i64,
    #[serde(rename = "FaultLevel", default)]
    pub fault_level: String,
}

/// One fault record for one physical device
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceFault {
    #[serde(rename = "FaultType", default)]
    pub fault_type: String,
    #[serde(rename = "NPUName", default)]
    pub npu_name: String,
    #[serde(rename = "FaultCode", default)]
    pub fault_code: String,
    #[serde(rename = "FaultLevel", default)]
    pub fault_level: String,
    /// Per-code fault times as produced by the device plugin
    #[serde(
        rename = "FaultTimeAndLevelMap",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub fault_time_and_level_map: BTreeMap<String, FaultTimeAndLevel>,
}

impl DeviceFault {
    /// Fault time recorded for this fault's own code
    pub fn fault_time(&self) -> Option<i64> {
        self.fault_time_and_level_map
            .get(&self.fault_code)
            .map(|t| t.fault_time)
    }

    /// Whether this is a card network fault
    pub fn is_network_fault(&self) -> bool {
        self.fault_type == CARD_NETWORK_UNHEALTHY
    }
}

/// Device info as published by the device plugin for one node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawDeviceInfo {
    #[serde(rename = "CmName", default)]
    pub cm_name: String,
    /// Resource key to value, fault lists are JSON encoded strings
    #[serde(rename = "DeviceList", default)]
    pub device_list: BTreeMap<String, String>,
    #[serde(rename = "SuperPodID", default)]
    pub super_pod_id: i32,
    #[serde(rename = "ServerIndex", default)]
    pub server_index: i32,
    #[serde(rename = "UpdateTime", default)]
    pub update_time: i64,
}

/// Normalized fault view of one node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdvanceDeviceFaultCm {
    #[serde(rename = "CmName", default)]
    pub cm_name: String,
    #[serde(rename = "ServerType", default)]
    pub server_type: String,
    #[serde(rename = "SuperPodID", default)]
    pub super_pod_id: i32,
    #[serde(rename = "ServerIndex", default)]
    pub server_index: i32,
    /// Device name to its faults
    #[serde(rename = "FaultDeviceList", default)]
    pub fault_device_list: BTreeMap<String, Vec<DeviceFault>>,
    /// `None` when the producer did not publish the key at all
    #[serde(rename = "CardUnHealthy", default)]
    pub card_unhealthy: Option<Vec<String>>,
    #[serde(rename = "NetworkUnhealthy", default)]
    pub network_unhealthy: Vec<String>,
    #[serde(rename = "UpdateTime", default)]
    pub update_time: i64,
}

impl AdvanceDeviceFaultCm {
    /// Node name derived from the ConfigMap name
    pub fn node_name(&self) -> &str {
        self.cm_name
            .strip_prefix(DEVICE_INFO_PREFIX)
            .unwrap_or(&self.cm_name)
    }

    /// Physical device name for a device id on this node, e.g. `Ascend910-3`
    pub fn device_name(&self, device_id: &str) -> String {
        format!("{}-{}", self.server_type, device_id)
    }

    /// Equality on everything except timestamps
    pub fn business_eq(&self, other: &Self) -> bool {
        self.cm_name == other.cm_name
            && self.server_type == other.server_type
            && self.super_pod_id == other.super_pod_id
            && self.server_index == other.server_index
            && self.fault_device_list == other.fault_device_list
            && self.card_unhealthy == other.card_unhealthy
            && self.network_unhealthy == other.network_unhealthy
    }

    /// Remove one fault from a device and repair the derived unhealthy lists
    ///
    /// Returns false when the fault was not present.
    pub fn del_fault_and_fix(&mut self, device: &str, fault: &DeviceFault) -> bool {
        let Some(faults) = self.fault_device_list.get_mut(device) else {
            return false;
        };
        let Some(pos) = faults.iter().position(|f| f == fault) else {
            return false;
        };
        faults.remove(pos);

        let still_unhealthy = faults
            .iter()
            .any(|f| is_card_unhealthy_level(&f.fault_level));
        let still_network = faults.iter().any(DeviceFault::is_network_fault);
        if faults.is_empty() {
            self.fault_device_list.remove(device);
        }

        if !still_unhealthy {
            if let Some(cards) = self.card_unhealthy.as_mut() {
                cards.retain(|c| c != device);
            }
        }
        if !still_network {
            self.network_unhealthy.retain(|c| c != device);
        }
        true
    }

    /// Sort every list for deterministic output
    pub fn sort_data(&mut self) {
        for faults in self.fault_device_list.values_mut() {
            faults.sort();
        }
        if let Some(cards) = self.card_unhealthy.as_mut() {
            cards.sort();
        }
        self.network_unhealthy.sort();
    }

    /// Faults above L1 per device, with their earliest fault time and code levels
    pub fn fault_devices(&self) -> HashMap<String, FaultDeviceView> {
        let mut devices: HashMap<String, FaultDeviceView> = HashMap::new();
        for (name, faults) in &self.fault_device_list {
            for fault in faults {
                if crate::taxonomy::is_l1_fault(&fault.fault_level) {
                    continue;
                }
                let fault_time = match fault.fault_time() {
                    Some(t) => t,
                    None => {
                        tracing::warn!(
                            node = %self.node_name(),
                            device = %name,
                            code = %fault.fault_code,
                            "fault code has no recorded fault time"
                        );
                        0
                    }
                };
                let view = devices.entry(name.clone()).or_insert_with(|| FaultDeviceView {
                    fault_time,
                    fault_code_level: HashMap::new(),
                });
                view.fault_time = view.fault_time.min(fault_time);
                view.fault_code_level
                    .entry(fault.fault_code.clone())
                    .or_insert_with(|| fault.fault_level.clone());
            }
        }
        devices
    }
}

/// Actionable fault state of one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultDeviceView {
    /// Earliest fault time over the device's codes
    pub fault_time: i64,
    /// Fault code to level
    pub fault_code_level: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fault(npu: &str, code: &str, level: &str, time: i64) -> DeviceFault {
        let mut map = BTreeMap::new();
        map.insert(
            code.to_string(),
            FaultTimeAndLevel {
                fault_time: time,
                fault_level: level.to_string(),
            },
        );
        DeviceFault {
            fault_type: "CardUnhealthy".to_string(),
            npu_name: npu.to_string(),
            fault_code: code.to_string(),
            fault_level: level.to_string(),
            fault_time_and_level_map: map,
        }
    }

    fn cm() -> AdvanceDeviceFaultCm {
        let mut list = BTreeMap::new();
        list.insert(
            "Ascend910-0".to_string(),
            vec![
                fault("Ascend910-0", "80C98000", "RestartBusiness", 100),
                fault("Ascend910-0", "80E01801", "NotHandleFault", 50),
            ],
        );
        AdvanceDeviceFaultCm {
            cm_name: "mindx-dl-deviceinfo-node1".to_string(),
            server_type: "Ascend910".to_string(),
            fault_device_list: list,
            card_unhealthy: Some(vec!["Ascend910-0".to_string()]),
            network_unhealthy: vec![],
            update_time: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_node_name_strips_prefix() {
        let cm = cm();
        assert_eq!(cm.node_name(), "node1");
        assert_eq!(cm.device_name("3"), "Ascend910-3");

        let bare = AdvanceDeviceFaultCm {
            cm_name: "node2".to_string(),
            ..Default::default()
        };
        assert_eq!(bare.node_name(), "node2");
    }

    #[test]
    fn test_business_eq_ignores_update_time() {
        let a = cm();
        let mut b = cm();
        b.update_time = 99;
        assert!(a.business_eq(&b));
        b.network_unhealthy.push("Ascend910-1".to_string());
        assert!(!a.business_eq(&b));
    }

    #[test]
    fn test_del_fault_and_fix_clears_card_unhealthy() {
        let mut cm = cm();
        let target = fault("Ascend910-0", "80C98000", "RestartBusiness", 100);
        assert!(cm.del_fault_and_fix("Ascend910-0", &target));
        // only the L1 fault remains, so the card is no longer unhealthy
        assert_eq!(cm.fault_device_list["Ascend910-0"].len(), 1);
        assert_eq!(cm.card_unhealthy, Some(vec![]));
        assert!(!cm.del_fault_and_fix("Ascend910-0", &target));

        let last = fault("Ascend910-0", "80E01801", "NotHandleFault", 50);
        assert!(cm.del_fault_and_fix("Ascend910-0", &last));
        assert!(!cm.fault_device_list.contains_key("Ascend910-0"));
    }

    #[test]
    fn test_del_network_fault_clears_network_list() {
        let mut cm = cm();
        let mut net = fault("Ascend910-0", "81078603", "RestartRequest", 10);
        net.fault_type = CARD_NETWORK_UNHEALTHY.to_string();
        cm.fault_device_list
            .get_mut("Ascend910-0")
            .unwrap()
            .push(net.clone());
        cm.network_unhealthy = vec!["Ascend910-0".to_string()];

        assert!(cm.del_fault_and_fix("Ascend910-0", &net));
        assert!(cm.network_unhealthy.is_empty());
        assert_eq!(cm.card_unhealthy, Some(vec!["Ascend910-0".to_string()]));
    }

    #[test]
    fn test_fault_devices_skips_l1() {
        let cm = cm();
        let devices = cm.fault_devices();
        let view = &devices["Ascend910-0"];
        assert_eq!(view.fault_time, 100);
        assert_eq!(view.fault_code_level.len(), 1);
        assert_eq!(view.fault_code_level["80C98000"], "RestartBusiness");
    }

    #[test]
    fn test_missing_fault_time_is_zero() {
        let mut cm = cm();
        cm.fault_device_list
            .get_mut("Ascend910-0")
            .unwrap()
            .iter_mut()
            .for_each(|f| f.fault_time_and_level_map.clear());
        assert_eq!(cm.fault_devices()["Ascend910-0"].fault_time, 0);
    }

    #[test]
    fn test_wire_names() {
        let json = r#"{"FaultType":"CardUnhealthy","NPUName":"Ascend910-1","FaultCode":"8C1F8608","FaultLevel":"RestartNPU"}"#;
        let f: DeviceFault = serde_json::from_str(json).unwrap();
        assert_eq!(f.npu_name, "Ascend910-1");
        assert_eq!(f.fault_time(), None);
        let out = serde_json::to_string(&f).unwrap();
        assert!(out.contains("\"NPUName\""));
        assert!(!out.contains("FaultTimeAndLevelMap"));
    }
}
