//! Fault Normalizer
//!
//! Turns the raw device info a device plugin publishes for one node into the
//! structured per-device fault view. Malformed fault lists never fail the
//! caller: they are logged and treated as "no faults".

use std::collections::BTreeMap;

use tracing::{debug, error, info, warn};

use crate::model::{AdvanceDeviceFaultCm, DeviceFault, RawDeviceInfo};

const ASCEND_RESOURCE: &str = "huawei.com/Ascend";
const FAULT_SUFFIX: &str = "-Fault";
const NETWORK_UNHEALTHY_SUFFIX: &str = "-NetworkUnhealthy";
const CARD_UNHEALTHY_SUFFIX: &str = "-Unhealthy";

/// Server families in match priority order
pub const ASCEND_910: &str = "Ascend910";
pub const ASCEND_310P: &str = "Ascend310P";
pub const ASCEND_310: &str = "Ascend310";

/// Normalize one node's raw device info
pub fn normalize(raw: &RawDeviceInfo) -> AdvanceDeviceFaultCm {
    let mut cm = AdvanceDeviceFaultCm {
        cm_name: raw.cm_name.clone(),
        server_type: server_type(raw).to_string(),
        super_pod_id: raw.super_pod_id,
        server_index: raw.server_index,
        update_time: raw.update_time,
        ..Default::default()
    };

    match find_key(raw, FAULT_SUFFIX) {
        Some(fault_list) => match serde_json::from_str::<Vec<DeviceFault>>(fault_list) {
            Ok(faults) => cm.fault_device_list = group_by_device(faults),
            Err(e) => {
                error!(cm = %raw.cm_name, error = %e, "Failed to decode device fault list");
                return cm;
            }
        },
        None => info!(cm = %raw.cm_name, "No device fault list published"),
    }

    if let Some(network) = find_key(raw, NETWORK_UNHEALTHY_SUFFIX) {
        cm.network_unhealthy = split_csv(network);
    }
    if let Some(cards) = find_key(raw, CARD_UNHEALTHY_SUFFIX) {
        cm.card_unhealthy = Some(split_csv(cards));
    }
    cm
}

/// Expand a fault whose code field carries several comma separated codes
pub fn split_device_fault(fault: &DeviceFault) -> Vec<DeviceFault> {
    let codes: String = fault.fault_code.chars().filter(|c| *c != ' ').collect();
    codes
        .split(',')
        .map(|code| DeviceFault {
            fault_code: code.to_string(),
            ..fault.clone()
        })
        .collect()
}

/// Infer the server family from the resource keys
pub fn server_type(raw: &RawDeviceInfo) -> &'static str {
    // 310P before 310, every 310P key also contains "Ascend310"
    for family in [ASCEND_910, ASCEND_310P, ASCEND_310] {
        if raw.device_list.keys().any(|key| key.contains(family)) {
            return family;
        }
    }
    warn!(cm = %raw.cm_name, "Cannot decide server type, assuming {}", ASCEND_910);
    ASCEND_910
}

fn find_key<'a>(raw: &'a RawDeviceInfo, suffix: &str) -> Option<&'a str> {
    raw.device_list
        .iter()
        .find(|(key, _)| key.contains(ASCEND_RESOURCE) && key.contains(suffix))
        .map(|(_, value)| value.as_str())
}

fn group_by_device(faults: Vec<DeviceFault>) -> BTreeMap<String, Vec<DeviceFault>> {
    let mut grouped: BTreeMap<String, Vec<DeviceFault>> = BTreeMap::new();
    for fault in faults {
        debug!(device = %fault.npu_name, code = %fault.fault_code, level = %fault.fault_level, "Device fault");
        grouped
            .entry(fault.npu_name.clone())
            .or_default()
            .extend(split_device_fault(&fault));
    }
    grouped
}

fn split_csv(value: &str) -> Vec<String> {
    if value.is_empty() {
        return Vec::new();
    }
    value.split(',').map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(entries: &[(&str, &str)]) -> RawDeviceInfo {
        RawDeviceInfo {
            cm_name: "mindx-dl-deviceinfo-node1".to_string(),
            device_list: entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            super_pod_id: 2,
            server_index: 5,
            update_time: 1000,
        }
    }

    #[test]
    fn test_split_merged_codes() {
        let blob = r#"[{"FaultType":"CardUnhealthy","NPUName":"Ascend910-0","FaultCode":"80C98000, 80CB8002","FaultLevel":"RestartBusiness"}]"#;
        let cm = normalize(&raw(&[
            ("huawei.com/Ascend910", "Ascend910-0,Ascend910-1"),
            ("huawei.com/Ascend910-Fault", blob),
        ]));
        assert_eq!(cm.server_type, "Ascend910");
        assert_eq!(cm.super_pod_id, 2);
        assert_eq!(cm.server_index, 5);
        let faults = &cm.fault_device_list["Ascend910-0"];
        assert_eq!(faults.len(), 2);
        assert_eq!(faults[0].fault_code, "80C98000");
        assert_eq!(faults[1].fault_code, "80CB8002");
        assert!(faults.iter().all(|f| f.fault_level == "RestartBusiness"));
    }

    #[test]
    fn test_decode_failure_yields_empty_list() {
        let cm = normalize(&raw(&[
            ("huawei.com/Ascend910-Fault", "not json"),
            ("huawei.com/Ascend910-Unhealthy", "Ascend910-0"),
        ]));
        assert!(cm.fault_device_list.is_empty());
        assert_eq!(cm.cm_name, "mindx-dl-deviceinfo-node1");
    }

    #[test]
    fn test_unhealthy_lists() {
        let cm = normalize(&raw(&[
            ("huawei.com/Ascend910-Fault", "[]"),
            ("huawei.com/Ascend910-NetworkUnhealthy", "Ascend910-1,Ascend910-2"),
        ]));
        assert_eq!(cm.network_unhealthy, vec!["Ascend910-1", "Ascend910-2"]);
        assert_eq!(cm.card_unhealthy, None);

        let cm = normalize(&raw(&[("huawei.com/Ascend910-Unhealthy", "")]));
        assert_eq!(cm.card_unhealthy, Some(vec![]));
        assert!(cm.network_unhealthy.is_empty());
    }

    #[test]
    fn test_server_type_inference() {
        assert_eq!(server_type(&raw(&[("huawei.com/Ascend310P", "")])), ASCEND_310P);
        assert_eq!(server_type(&raw(&[("huawei.com/Ascend310", "")])), ASCEND_310);
        assert_eq!(server_type(&raw(&[("unrelated", "")])), ASCEND_910);
    }

    #[test]
    fn test_server_type_prefers_higher_family() {
        let mixed = raw(&[("huawei.com/Ascend310", ""), ("huawei.com/Ascend910", "")]);
        assert_eq!(server_type(&mixed), ASCEND_910);

        let mixed = raw(&[("huawei.com/Ascend310", ""), ("huawei.com/Ascend310P", "")]);
        assert_eq!(server_type(&mixed), ASCEND_310P);
    }

    #[test]
    fn test_split_keeps_time_map() {
        let blob = r#"[{"NPUName":"Ascend910-3","FaultCode":"A,B","FaultLevel":"RestartRequest","FaultTimeAndLevelMap":{"A":{"FaultTime":10,"FaultLevel":"RestartRequest"},"B":{"FaultTime":20,"FaultLevel":"RestartRequest"}}}]"#;
        let cm = normalize(&raw(&[("huawei.com/Ascend910-Fault", blob)]));
        let faults = &cm.fault_device_list["Ascend910-3"];
        assert_eq!(faults[0].fault_time(), Some(10));
        assert_eq!(faults[1].fault_time(), Some(20));
    }
}
