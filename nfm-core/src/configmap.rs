//! Fault ConfigMap payload decoding
//!
//! Each fault domain is published as one ConfigMap per node. The kind is
//! selected by name prefix and each kind has its own decoder.

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;

use crate::error::FaultError;
use crate::model::{
    NodeInfo, RawDeviceInfo, SwitchInfo, DEVICE_INFO_PREFIX, NODE_INFO_PREFIX, SWITCH_INFO_PREFIX,
};
use crate::snapshot::FaultDomain;

/// Data key of device info ConfigMaps
pub const DEVICE_INFO_KEY: &str = "DeviceInfoCfg";
/// Data key of switch info ConfigMaps
pub const SWITCH_INFO_KEY: &str = "SwitchInfoCfg";
/// Data key of node info ConfigMaps
pub const NODE_INFO_KEY: &str = "NodeInfo";

/// Kind of fault ConfigMap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigMapKind {
    DeviceInfo,
    SwitchInfo,
    NodeInfo,
}

impl ConfigMapKind {
    /// Kind selected by ConfigMap name prefix
    pub fn from_name(name: &str) -> Option<Self> {
        if name.starts_with(DEVICE_INFO_PREFIX) {
            Some(ConfigMapKind::DeviceInfo)
        } else if name.starts_with(SWITCH_INFO_PREFIX) {
            Some(ConfigMapKind::SwitchInfo)
        } else if name.starts_with(NODE_INFO_PREFIX) {
            Some(ConfigMapKind::NodeInfo)
        } else {
            None
        }
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            ConfigMapKind::DeviceInfo => DEVICE_INFO_PREFIX,
            ConfigMapKind::SwitchInfo => SWITCH_INFO_PREFIX,
            ConfigMapKind::NodeInfo => NODE_INFO_PREFIX,
        }
    }

    pub fn data_key(&self) -> &'static str {
        match self {
            ConfigMapKind::DeviceInfo => DEVICE_INFO_KEY,
            ConfigMapKind::SwitchInfo => SWITCH_INFO_KEY,
            ConfigMapKind::NodeInfo => NODE_INFO_KEY,
        }
    }

    pub fn domain(&self) -> FaultDomain {
        match self {
            ConfigMapKind::DeviceInfo => FaultDomain::Device,
            ConfigMapKind::SwitchInfo => FaultDomain::Switch,
            ConfigMapKind::NodeInfo => FaultDomain::Node,
        }
    }

    /// Node name carried by a ConfigMap name of this kind
    pub fn node_name<'a>(&self, cm_name: &'a str) -> &'a str {
        cm_name.strip_prefix(self.prefix()).unwrap_or(cm_name)
    }
}

impl fmt::Display for ConfigMapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigMapKind::DeviceInfo => write!(f, "deviceinfo"),
            ConfigMapKind::SwitchInfo => write!(f, "switchinfo"),
            ConfigMapKind::NodeInfo => write!(f, "nodeinfo"),
        }
    }
}

/// Decoded fault ConfigMap
#[derive(Debug, Clone, PartialEq)]
pub enum FaultConfigMap {
    Device(RawDeviceInfo),
    Switch(SwitchInfo),
    Node(NodeInfo),
}

impl FaultConfigMap {
    pub fn kind(&self) -> ConfigMapKind {
        match self {
            FaultConfigMap::Device(_) => ConfigMapKind::DeviceInfo,
            FaultConfigMap::Switch(_) => ConfigMapKind::SwitchInfo,
            FaultConfigMap::Node(_) => ConfigMapKind::NodeInfo,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DeviceInfoNoName {
    #[serde(rename = "DeviceList", default)]
    device_list: BTreeMap<String, String>,
    #[serde(rename = "UpdateTime", default)]
    update_time: i64,
}

#[derive(Debug, Deserialize)]
struct DeviceInfoCfg {
    #[serde(rename = "DeviceInfo")]
    device_info: DeviceInfoNoName,
    #[serde(rename = "SuperPodID", default)]
    super_pod_id: i32,
    #[serde(rename = "ServerIndex", default)]
    server_index: i32,
}

/// Decode a ConfigMap whose kind is selected by its name
pub fn decode(name: &str, data: &BTreeMap<String, String>) -> Result<FaultConfigMap, FaultError> {
    match ConfigMapKind::from_name(name) {
        Some(ConfigMapKind::DeviceInfo) => decode_device_info(name, data),
        Some(ConfigMapKind::SwitchInfo) => decode_switch_info(name, data),
        Some(ConfigMapKind::NodeInfo) => decode_node_info(name, data),
        None => Err(FaultError::UnknownConfigMap(name.to_string())),
    }
}

fn payload<'a>(
    name: &str,
    data: &'a BTreeMap<String, String>,
    key: &str,
) -> Result<&'a str, FaultError> {
    data.get(key)
        .map(String::as_str)
        .ok_or_else(|| FaultError::MissingKey {
            name: name.to_string(),
            key: key.to_string(),
        })
}

pub fn decode_device_info(
    name: &str,
    data: &BTreeMap<String, String>,
) -> Result<FaultConfigMap, FaultError> {
    let raw = payload(name, data, DEVICE_INFO_KEY)?;
    let cfg: DeviceInfoCfg =
        serde_json::from_str(raw).map_err(|e| FaultError::decode(name, e))?;
    Ok(FaultConfigMap::Device(RawDeviceInfo {
        cm_name: name.to_string(),
        device_list: cfg.device_info.device_list,
        super_pod_id: cfg.super_pod_id,
        server_index: cfg.server_index,
        update_time: cfg.device_info.update_time,
    }))
}

pub fn decode_switch_info(
    name: &str,
    data: &BTreeMap<String, String>,
) -> Result<FaultConfigMap, FaultError> {
    let raw = payload(name, data, SWITCH_INFO_KEY)?;
    let mut info: SwitchInfo =
        serde_json::from_str(raw).map_err(|e| FaultError::decode(name, e))?;
    info.cm_name = name.to_string();
    Ok(FaultConfigMap::Switch(info))
}

pub fn decode_node_info(
    name: &str,
    data: &BTreeMap<String, String>,
) -> Result<FaultConfigMap, FaultError> {
    let raw = payload(name, data, NODE_INFO_KEY)?;
    let mut info: NodeInfo =
        serde_json::from_str(raw).map_err(|e| FaultError::decode(name, e))?;
    info.cm_name = name.to_string();
    Ok(FaultConfigMap::Node(info))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(key: &str, value: &str) -> BTreeMap<String, String> {
        [(key.to_string(), value.to_string())].into()
    }

    #[test]
    fn test_kind_from_name() {
        assert_eq!(
            ConfigMapKind::from_name("mindx-dl-deviceinfo-node1"),
            Some(ConfigMapKind::DeviceInfo)
        );
        assert_eq!(
            ConfigMapKind::from_name("mindx-dl-switchinfo-node1"),
            Some(ConfigMapKind::SwitchInfo)
        );
        assert_eq!(
            ConfigMapKind::from_name("mindx-dl-nodeinfo-node1"),
            Some(ConfigMapKind::NodeInfo)
        );
        assert_eq!(ConfigMapKind::from_name("kube-root-ca.crt"), None);
        assert_eq!(ConfigMapKind::NodeInfo.node_name("mindx-dl-nodeinfo-n3"), "n3");
    }

    #[test]
    fn test_decode_device_info() {
        let cfg = r#"{"DeviceInfo":{"DeviceList":{"huawei.com/Ascend910":"Ascend910-0"},"UpdateTime":77},"SuperPodID":3,"ServerIndex":1}"#;
        let decoded = decode("mindx-dl-deviceinfo-node1", &data(DEVICE_INFO_KEY, cfg)).unwrap();
        let FaultConfigMap::Device(raw) = decoded else {
            panic!("expected device payload");
        };
        assert_eq!(raw.cm_name, "mindx-dl-deviceinfo-node1");
        assert_eq!(raw.update_time, 77);
        assert_eq!(raw.super_pod_id, 3);
        assert_eq!(raw.device_list["huawei.com/Ascend910"], "Ascend910-0");
    }

    #[test]
    fn test_decode_switch_and_node() {
        let switch = decode(
            "mindx-dl-switchinfo-node1",
            &data(SWITCH_INFO_KEY, r#"{"FaultLevel":"SeparateNPU","NodeStatus":"UnHealthy","FaultInfo":[]}"#),
        )
        .unwrap();
        assert_eq!(switch.kind(), ConfigMapKind::SwitchInfo);
        if let FaultConfigMap::Switch(info) = switch {
            assert!(info.is_unhealthy());
            assert_eq!(info.node_name(), "node1");
        }

        let node = decode(
            "mindx-dl-nodeinfo-node2",
            &data(NODE_INFO_KEY, r#"{"NodeStatus":"Healthy","FaultDevList":[]}"#),
        )
        .unwrap();
        assert_eq!(node.kind().domain(), FaultDomain::Node);
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(
            decode("other", &BTreeMap::new()),
            Err(FaultError::UnknownConfigMap(_))
        ));
        assert!(matches!(
            decode("mindx-dl-nodeinfo-n", &BTreeMap::new()),
            Err(FaultError::MissingKey { .. })
        ));
        assert!(matches!(
            decode("mindx-dl-switchinfo-n", &data(SWITCH_INFO_KEY, "{")),
            Err(FaultError::Decode { .. })
        ));
    }
}
