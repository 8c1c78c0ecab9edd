//! Fault Manager
//!
//! Owns the three snapshot centers and the device processor chain, and
//! drives one reconciliation loop per fault domain.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::configmap::{ConfigMapKind, FaultConfigMap};
use crate::error::FaultError;
use crate::model::{AdvanceDeviceFaultCm, JobFaultInfo, NodeInfo, RawDeviceInfo, SwitchInfo};
use crate::normalizer::normalize;
use crate::processor::{JobRankFaultInfoProcessor, RecoverInPlaceProcessor};
use crate::provider::{JobInfoProvider, ReportTimeProvider};
use crate::snapshot::{FaultDomain, FaultSnapshot, SnapshotCenter, Stage};
use crate::taxonomy::SubHealthStrategy;

/// Fault manager configuration
#[derive(Debug, Clone)]
pub struct FaultManagerConfig {
    /// Debounce interval of the device domain
    pub device_interval: Duration,
    /// Debounce interval of the switch domain
    pub switch_interval: Duration,
    /// Debounce interval of the node domain
    pub node_interval: Duration,
    /// Period of the driving loop
    pub tick_interval: Duration,
    /// Age after which a fault can no longer be filtered
    pub restart_in_place_timeout: Duration,
    /// Maximum number of nodes per domain snapshot
    pub max_node_num: usize,
}

impl Default for FaultManagerConfig {
    fn default() -> Self {
        Self {
            device_interval: Duration::from_millis(500),
            switch_interval: Duration::from_secs(5),
            node_interval: Duration::from_secs(5),
            tick_interval: Duration::from_secs(1),
            restart_in_place_timeout: Duration::from_secs(300),
            max_node_num: 10_000,
        }
    }
}

/// Cluster fault manager
pub struct FaultManager {
    config: FaultManagerConfig,
    jobs: Arc<dyn JobInfoProvider>,
    devices: Arc<SnapshotCenter<AdvanceDeviceFaultCm>>,
    switches: Arc<SnapshotCenter<SwitchInfo>>,
    nodes: Arc<SnapshotCenter<NodeInfo>>,
    recover_in_place: Arc<RecoverInPlaceProcessor>,
    job_rank: Arc<JobRankFaultInfoProcessor>,
}

impl FaultManager {
    /// Create a fault manager with its processor chain registered
    pub fn new(
        config: FaultManagerConfig,
        jobs: Arc<dyn JobInfoProvider>,
        reports: Arc<dyn ReportTimeProvider>,
    ) -> Self {
        let devices = Arc::new(SnapshotCenter::new(
            FaultDomain::Device,
            config.device_interval,
            config.max_node_num,
        ));
        let switches = Arc::new(SnapshotCenter::new(
            FaultDomain::Switch,
            config.switch_interval,
            config.max_node_num,
        ));
        let nodes = Arc::new(SnapshotCenter::new(
            FaultDomain::Node,
            config.node_interval,
            config.max_node_num,
        ));

        let job_rank = Arc::new(JobRankFaultInfoProcessor::new(
            jobs.clone(),
            switches.clone(),
            nodes.clone(),
        ));
        let recover_in_place = Arc::new(RecoverInPlaceProcessor::new(
            jobs.clone(),
            reports,
            config.restart_in_place_timeout,
        ));

        // raw visibility first, then filtering
        devices.register(Stage::Observe(job_rank.clone()));
        devices.register(Stage::Filter(recover_in_place.clone()));

        Self {
            config,
            jobs,
            devices,
            switches,
            nodes,
            recover_in_place,
            job_rank,
        }
    }

    pub fn config(&self) -> &FaultManagerConfig {
        &self.config
    }

    pub fn device_center(&self) -> &Arc<SnapshotCenter<AdvanceDeviceFaultCm>> {
        &self.devices
    }

    pub fn switch_center(&self) -> &Arc<SnapshotCenter<SwitchInfo>> {
        &self.switches
    }

    pub fn node_center(&self) -> &Arc<SnapshotCenter<NodeInfo>> {
        &self.nodes
    }

    /// Normalize and store a node's device info
    pub fn on_device_info_update(&self, raw: &RawDeviceInfo) -> Result<bool, FaultError> {
        self.devices.update_original(normalize(raw))
    }

    pub fn on_device_info_delete(&self, node: &str) -> bool {
        self.devices.delete_original(node)
    }

    pub fn on_switch_info_update(&self, info: SwitchInfo) -> Result<bool, FaultError> {
        self.switches.update_original(info)
    }

    pub fn on_switch_info_delete(&self, node: &str) -> bool {
        self.switches.delete_original(node)
    }

    pub fn on_node_info_update(&self, info: NodeInfo) -> Result<bool, FaultError> {
        self.nodes.update_original(info)
    }

    pub fn on_node_info_delete(&self, node: &str) -> bool {
        self.nodes.delete_original(node)
    }

    /// Store a decoded fault ConfigMap
    pub fn apply(&self, cm: FaultConfigMap) -> Result<bool, FaultError> {
        match cm {
            FaultConfigMap::Device(raw) => self.on_device_info_update(&raw),
            FaultConfigMap::Switch(info) => self.on_switch_info_update(info),
            FaultConfigMap::Node(info) => self.on_node_info_update(info),
        }
    }

    /// Forget a node's payload of one kind
    pub fn remove(&self, kind: ConfigMapKind, node: &str) -> bool {
        match kind {
            ConfigMapKind::DeviceInfo => self.on_device_info_delete(node),
            ConfigMapKind::SwitchInfo => self.on_switch_info_delete(node),
            ConfigMapKind::NodeInfo => self.on_node_info_delete(node),
        }
    }

    /// Nodes with an original payload of one kind
    pub fn original_nodes(&self, kind: ConfigMapKind) -> Vec<String> {
        match kind {
            ConfigMapKind::DeviceInfo => self.devices.original_nodes(),
            ConfigMapKind::SwitchInfo => self.switches.original_nodes(),
            ConfigMapKind::NodeInfo => self.nodes.original_nodes(),
        }
    }

    /// Tick every domain, switch and node first so the device stages see them
    pub fn process_all(&self) {
        self.switches.process();
        self.nodes.process();
        self.devices.process();
    }

    /// Run the per-domain loops until shutdown
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            device_interval = ?self.config.device_interval,
            switch_interval = ?self.config.switch_interval,
            node_interval = ?self.config.node_interval,
            tick_interval = ?self.config.tick_interval,
            "Starting fault manager"
        );
        tokio::join!(
            drive(&self.switches, self.config.tick_interval, shutdown.clone()),
            drive(&self.nodes, self.config.tick_interval, shutdown.clone()),
            drive(&self.devices, self.config.tick_interval, shutdown),
        );
        info!("Fault manager stopped");
        Ok(())
    }

    /// Run the recover-in-place filter over an owned device map
    pub fn process_device_content(
        &self,
        content: HashMap<String, AdvanceDeviceFaultCm>,
    ) -> HashMap<String, AdvanceDeviceFaultCm> {
        self.recover_in_place.process(content)
    }

    pub fn can_do_restart_in_place(&self, job_id: &str, pod_rank: &str) -> bool {
        self.recover_in_place.can_do_restart_in_place(job_id, pod_rank)
    }

    pub fn filter_fault_code_and_level(
        &self,
        job_id: &str,
        node_name: &str,
        device_name: &str,
    ) -> Option<HashMap<String, String>> {
        self.recover_in_place
            .filter_fault_code_and_level(job_id, node_name, device_name)
    }

    /// Unrecovered pod ranks, `strategy` defaults to the job's own
    pub fn job_unrecovered_pod_ranks(
        &self,
        job_id: &str,
        strategy: Option<SubHealthStrategy>,
    ) -> (Vec<String>, bool) {
        let strategy = strategy.unwrap_or_else(|| self.jobs.sub_health_strategy(job_id));
        self.recover_in_place
            .job_unrecovered_pod_ranks(job_id, strategy)
    }

    pub fn job_fault_rank_infos(&self) -> HashMap<String, JobFaultInfo> {
        self.job_rank.job_fault_rank_infos()
    }

    pub fn job_fault_rank_infos_filter_level(&self, level: &str) -> HashMap<String, JobFaultInfo> {
        self.job_rank.job_fault_rank_infos_filter_level(level)
    }

    pub fn device_infos(&self) -> HashMap<String, AdvanceDeviceFaultCm> {
        self.devices.get_processed()
    }

    pub fn switch_infos(&self) -> HashMap<String, SwitchInfo> {
        self.switches.get_processed()
    }

    pub fn node_infos(&self) -> HashMap<String, NodeInfo> {
        self.nodes.get_processed()
    }

    /// Completed tick counter of one domain
    pub fn subscribe(&self, domain: FaultDomain) -> watch::Receiver<u64> {
        match domain {
            FaultDomain::Device => self.devices.subscribe(),
            FaultDomain::Switch => self.switches.subscribe(),
            FaultDomain::Node => self.nodes.subscribe(),
        }
    }
}

async fn drive<T: FaultSnapshot>(
    center: &SnapshotCenter<T>,
    tick: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let domain = center.domain();
    let mut ticker = tokio::time::interval(tick);
    // Skip immediate first tick
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                center.process();
            }
            _ = center.notified() => {
                debug!(domain = %domain, "Snapshot changed, processing");
                center.process();
            }
            changed = shutdown.changed() => {
                if changed.is_err() {
                    warn!(domain = %domain, "Shutdown channel closed, stopping loop");
                    break;
                }
                if *shutdown.borrow() {
                    info!(domain = %domain, "Shutdown signal received, stopping loop");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::configmap::{decode, DEVICE_INFO_KEY, SWITCH_INFO_KEY};
    use crate::model::{Device, HealthyState, ServerHccl};
    use crate::provider::{InMemoryJobRegistry, JobEntry, ReportInfoCollector};

    fn manager() -> FaultManager {
        let registry = InMemoryJobRegistry::new();
        registry.upsert_job(
            "J1",
            JobEntry {
                restart_in_place: true,
                pod_device_num: 1,
                servers: [(
                    "node1".to_string(),
                    ServerHccl {
                        device_list: vec![
                            Device {
                                device_id: "0".to_string(),
                                rank_id: "0".to_string(),
                            },
                            Device {
                                device_id: "1".to_string(),
                                rank_id: "1".to_string(),
                            },
                        ],
                    },
                )]
                .into(),
                ..Default::default()
            },
        );
        FaultManager::new(
            FaultManagerConfig::default(),
            Arc::new(registry),
            Arc::new(ReportInfoCollector::new()),
        )
    }

    fn device_cm(level: &str, fault_time: i64) -> FaultConfigMap {
        let faults = format!(
            r#"[{{"FaultType":"CardUnhealthy","NPUName":"Ascend910-1","FaultCode":"80C98000","FaultLevel":"{level}","FaultTimeAndLevelMap":{{"80C98000":{{"FaultTime":{fault_time},"FaultLevel":"{level}"}}}}}}]"#
        );
        let mut device_list = BTreeMap::new();
        device_list.insert("huawei.com/Ascend910".to_string(), "Ascend910-0,Ascend910-1".to_string());
        device_list.insert("huawei.com/Ascend910-Fault".to_string(), faults);
        device_list.insert("huawei.com/Ascend910-Unhealthy".to_string(), "Ascend910-1".to_string());
        let cfg = serde_json::json!({
            "DeviceInfo": {"DeviceList": device_list, "UpdateTime": 1},
            "SuperPodID": 0,
            "ServerIndex": 0,
        });
        let data: BTreeMap<String, String> =
            [(DEVICE_INFO_KEY.to_string(), cfg.to_string())].into();
        decode("mindx-dl-deviceinfo-node1", &data).unwrap()
    }

    #[test]
    fn test_recoverable_fault_is_filtered_end_to_end() {
        let m = manager();
        let now = chrono::Utc::now().timestamp_millis();
        assert!(m.apply(device_cm("RestartBusiness", now)).unwrap());
        m.process_all();

        let processed = m.device_infos();
        let cm = &processed["node1"];
        assert!(cm.fault_device_list.is_empty());
        assert_eq!(cm.card_unhealthy, Some(vec![]));

        // the raw fault stays visible to job rank consumers and the original
        let infos = m.job_fault_rank_infos();
        assert_eq!(infos["J1"].fault_list.len(), 1);
        assert_eq!(infos["J1"].fault_list[0].rank_id, "1");
        assert_eq!(infos["J1"].healthy_state, HealthyState::UnHealthy);
        assert!(!m.device_center().get_original()["node1"]
            .fault_device_list
            .is_empty());

        assert!(m.can_do_restart_in_place("J1", "1"));
        assert!(!m.can_do_restart_in_place("J1", "0"));
        assert_eq!(
            m.filter_fault_code_and_level("J1", "node1", "Ascend910-1")
                .unwrap()["80C98000"],
            "RestartBusiness"
        );
        let (ranks, done) = m.job_unrecovered_pod_ranks("J1", None);
        assert_eq!(ranks, vec!["1"]);
        assert!(!done);
    }

    #[test]
    fn test_unrecoverable_fault_is_kept() {
        let m = manager();
        let now = chrono::Utc::now().timestamp_millis();
        m.apply(device_cm("SeparateNPU", now)).unwrap();
        m.process_all();
        assert_eq!(m.device_infos()["node1"].fault_device_list.len(), 1);
        assert!(!m.can_do_restart_in_place("J1", "1"));
    }

    #[test]
    fn test_apply_and_remove_switch() {
        let m = manager();
        let data: BTreeMap<String, String> = [(
            SWITCH_INFO_KEY.to_string(),
            r#"{"NodeStatus":"UnHealthy"}"#.to_string(),
        )]
        .into();
        let cm = decode("mindx-dl-switchinfo-node1", &data).unwrap();
        assert!(m.apply(cm).unwrap());
        m.process_all();
        assert!(m.switch_infos()["node1"].is_unhealthy());
        assert_eq!(m.job_fault_rank_infos()["J1"].fault_list.len(), 2);

        assert!(m.remove(ConfigMapKind::SwitchInfo, "node1"));
        assert!(!m.remove(ConfigMapKind::SwitchInfo, "node1"));
        assert!(m.node_infos().is_empty());
    }

    #[test]
    fn test_process_device_content() {
        let m = manager();
        let now = chrono::Utc::now().timestamp_millis();
        let FaultConfigMap::Device(raw) = device_cm("RestartRequest", now) else {
            panic!("expected device payload");
        };
        let content: HashMap<String, AdvanceDeviceFaultCm> =
            [("node1".to_string(), normalize(&raw))].into();
        let out = m.process_device_content(content);
        assert!(out["node1"].fault_device_list.is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let m = Arc::new(FaultManager::new(
            FaultManagerConfig {
                tick_interval: Duration::from_millis(10),
                ..Default::default()
            },
            Arc::new(InMemoryJobRegistry::new()),
            Arc::new(ReportInfoCollector::new()),
        ));
        let mut ticks = m.subscribe(FaultDomain::Device);
        let (tx, rx) = watch::channel(false);

        let runner = {
            let m = m.clone();
            tokio::spawn(async move { m.run(rx).await })
        };

        tokio::time::timeout(Duration::from_secs(2), ticks.changed())
            .await
            .unwrap()
            .unwrap();
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), runner)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
