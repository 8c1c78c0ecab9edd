//! Fault ConfigMap watcher
//!
//! Streams device, switch and node info ConfigMaps of one namespace into the
//! fault manager. Decode failures are logged and skipped.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::runtime::watcher;
use kube::ResourceExt;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use nfm_core::configmap::decode;
use nfm_core::{ConfigMapKind, FaultError, FaultManager};

use super::client::{config_map_data, K8sClient};

/// Feeds fault ConfigMap events into a fault manager
pub struct ConfigMapWatcher {
    client: K8sClient,
    namespace: String,
    manager: Arc<FaultManager>,
}

impl ConfigMapWatcher {
    pub fn new(client: K8sClient, namespace: impl Into<String>, manager: Arc<FaultManager>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            manager,
        }
    }

    /// Watch until shutdown
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(namespace = %self.namespace, "Starting configmap watcher");
        let api = self.client.config_maps(&self.namespace);
        let mut stream = watcher(api, watcher::Config::default()).boxed();

        loop {
            tokio::select! {
                event = stream.try_next() => {
                    match event {
                        Ok(Some(event)) => handle_event(&self.manager, event),
                        Ok(None) => {
                            warn!("Configmap watch stream ended");
                            break;
                        }
                        Err(e) => {
                            // the watcher re-lists on its own after errors
                            warn!(error = %e, "Configmap watch error");
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown signal received, stopping configmap watcher");
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Dispatch one watch event
pub fn handle_event(manager: &FaultManager, event: watcher::Event<ConfigMap>) {
    match event {
        watcher::Event::Applied(cm) => handle_applied(manager, &cm),
        watcher::Event::Deleted(cm) => handle_deleted(manager, &cm),
        watcher::Event::Restarted(cms) => handle_restarted(manager, &cms),
    }
}

/// Resync with a full re-list: apply every listed ConfigMap and forget
/// nodes whose ConfigMap is no longer present
pub fn handle_restarted(manager: &FaultManager, cms: &[ConfigMap]) {
    debug!(count = cms.len(), "Configmap watch restarted");
    let mut listed: HashSet<(ConfigMapKind, String)> = HashSet::new();
    for cm in cms {
        let name = cm.name_any();
        if let Some(kind) = ConfigMapKind::from_name(&name) {
            listed.insert((kind, kind.node_name(&name).to_string()));
        }
        handle_applied(manager, cm);
    }

    for kind in [
        ConfigMapKind::DeviceInfo,
        ConfigMapKind::SwitchInfo,
        ConfigMapKind::NodeInfo,
    ] {
        for node in manager.original_nodes(kind) {
            if !listed.contains(&(kind, node.clone())) && manager.remove(kind, &node) {
                info!(node = %node, kind = %kind, "Removed fault configmap missing after resync");
            }
        }
    }
}

/// Store an added or updated fault ConfigMap
pub fn handle_applied(manager: &FaultManager, cm: &ConfigMap) {
    let name = cm.name_any();
    if ConfigMapKind::from_name(&name).is_none() {
        return;
    }
    let result = decode(&name, &config_map_data(cm)).and_then(|decoded| manager.apply(decoded));
    match result {
        Ok(changed) => debug!(configmap = %name, changed, "Applied fault configmap"),
        Err(e @ FaultError::CapacityExceeded { .. }) => {
            warn!(configmap = %name, error = %e, "Fault configmap rejected")
        }
        Err(e) => error!(configmap = %name, error = %e, "Failed to apply fault configmap"),
    }
}

/// Forget a deleted fault ConfigMap
pub fn handle_deleted(manager: &FaultManager, cm: &ConfigMap) {
    let name = cm.name_any();
    let Some(kind) = ConfigMapKind::from_name(&name) else {
        return;
    };
    let node = kind.node_name(&name);
    if manager.remove(kind, node) {
        info!(configmap = %name, node = %node, kind = %kind, "Removed fault configmap");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use nfm_core::{FaultManagerConfig, InMemoryJobRegistry, ReportInfoCollector};

    fn manager() -> FaultManager {
        FaultManager::new(
            FaultManagerConfig::default(),
            Arc::new(InMemoryJobRegistry::new()),
            Arc::new(ReportInfoCollector::new()),
        )
    }

    fn config_map(name: &str, key: &str, value: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            data: Some([(key.to_string(), value.to_string())].into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_applied_and_deleted_node_info() {
        let m = manager();
        let cm = config_map(
            "mindx-dl-nodeinfo-node1",
            "NodeInfo",
            r#"{"NodeStatus":"UnHealthy","FaultDevList":[]}"#,
        );
        handle_event(&m, watcher::Event::Applied(cm.clone()));
        assert_eq!(m.node_center().original_len(), 1);

        handle_event(&m, watcher::Event::Deleted(cm));
        assert_eq!(m.node_center().original_len(), 0);
    }

    #[test]
    fn test_restart_applies_every_configmap() {
        let m = manager();
        let device = config_map(
            "mindx-dl-deviceinfo-node1",
            "DeviceInfoCfg",
            r#"{"DeviceInfo":{"DeviceList":{"huawei.com/Ascend910-Fault":"[]"},"UpdateTime":1}}"#,
        );
        let switch = config_map("mindx-dl-switchinfo-node1", "SwitchInfoCfg", r#"{"NodeStatus":"Healthy"}"#);
        let unrelated = config_map("kube-root-ca.crt", "ca.crt", "x");
        handle_event(&m, watcher::Event::Restarted(vec![device, switch, unrelated]));

        assert_eq!(m.device_center().original_len(), 1);
        assert_eq!(m.switch_center().original_len(), 1);
        assert_eq!(m.node_center().original_len(), 0);
    }

    #[test]
    fn test_restart_forgets_configmaps_deleted_while_disconnected() {
        let m = manager();
        let a = config_map("mindx-dl-nodeinfo-a", "NodeInfo", r#"{"NodeStatus":"Healthy"}"#);
        let b = config_map("mindx-dl-nodeinfo-b", "NodeInfo", r#"{"NodeStatus":"UnHealthy"}"#);
        let switch = config_map("mindx-dl-switchinfo-a", "SwitchInfoCfg", r#"{"NodeStatus":"Healthy"}"#);
        handle_event(&m, watcher::Event::Applied(a.clone()));
        handle_event(&m, watcher::Event::Applied(b));
        handle_event(&m, watcher::Event::Applied(switch));
        assert_eq!(m.node_center().original_len(), 2);

        handle_event(&m, watcher::Event::Restarted(vec![a]));
        assert_eq!(m.node_center().original_nodes(), vec!["a".to_string()]);
        assert_eq!(m.switch_center().original_len(), 0);
    }

    #[test]
    fn test_malformed_payload_is_skipped() {
        let m = manager();
        handle_applied(&m, &config_map("mindx-dl-switchinfo-node1", "SwitchInfoCfg", "{"));
        assert_eq!(m.switch_center().original_len(), 0);
    }
}
