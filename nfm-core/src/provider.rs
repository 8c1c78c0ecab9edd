//! Collaborator interfaces
//!
//! The core reads job placement and workload report times through these
//! traits. In-memory implementations are provided for the binary and tests.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::model::{JobServerInfoMap, ServerHccl, JOB_SHOULD_REPORT_FAULT};
use crate::taxonomy::SubHealthStrategy;

/// Job placement and enrollment lookups
pub trait JobInfoProvider: Send + Sync {
    /// job id -> node name -> devices
    fn job_server_info_map(&self) -> JobServerInfoMap;

    /// Whether the job is enrolled in in-place recovery
    fn is_restart_in_place_enabled(&self, job_id: &str) -> bool;

    fn sub_health_strategy(&self, job_id: &str) -> SubHealthStrategy;

    /// Devices per logical replica of the job, 0 when unknown
    fn pod_device_num(&self, job_id: &str) -> usize;
}

/// Workload fault acknowledgement times
pub trait ReportTimeProvider: Send + Sync {
    /// Report time in unix millis, `JOB_SHOULD_REPORT_FAULT` when none
    fn single_process_fault_report_time(&self, job_id: &str, pod_rank: &str) -> i64;
}

/// One job of the job table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEntry {
    #[serde(default)]
    pub restart_in_place: bool,
    #[serde(default)]
    pub sub_health_strategy: SubHealthStrategy,
    #[serde(default)]
    pub pod_device_num: usize,
    /// Node name to devices
    #[serde(default)]
    pub servers: HashMap<String, ServerHccl>,
}

/// Job table file layout
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTable {
    #[serde(default)]
    pub jobs: HashMap<String, JobEntry>,
}

/// Job registry held in memory
#[derive(Debug, Default)]
pub struct InMemoryJobRegistry {
    jobs: RwLock<HashMap<String, JobEntry>>,
}

impl InMemoryJobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a job table from a YAML or JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read job table: {}", path.display()))?;
        let registry = Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse job table: {}", path.display()))?;
        info!(path = %path.display(), jobs = registry.len(), "Loaded job table");
        Ok(registry)
    }

    /// Parse a job table, JSON is accepted as well
    pub fn from_yaml(content: &str) -> Result<Self> {
        let table: JobTable = serde_yaml::from_str(content)?;
        Ok(Self {
            jobs: RwLock::new(table.jobs),
        })
    }

    pub fn upsert_job(&self, job_id: impl Into<String>, entry: JobEntry) {
        let job_id = job_id.into();
        debug!(job = %job_id, nodes = entry.servers.len(), "Upserting job");
        self.jobs.write().insert(job_id, entry);
    }

    pub fn remove_job(&self, job_id: &str) -> bool {
        self.jobs.write().remove(job_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }
}

impl JobInfoProvider for InMemoryJobRegistry {
    fn job_server_info_map(&self) -> JobServerInfoMap {
        self.jobs
            .read()
            .iter()
            .map(|(id, entry)| (id.clone(), entry.servers.clone()))
            .collect()
    }

    fn is_restart_in_place_enabled(&self, job_id: &str) -> bool {
        self.jobs
            .read()
            .get(job_id)
            .map(|j| j.restart_in_place)
            .unwrap_or(false)
    }

    fn sub_health_strategy(&self, job_id: &str) -> SubHealthStrategy {
        self.jobs
            .read()
            .get(job_id)
            .map(|j| j.sub_health_strategy)
            .unwrap_or_default()
    }

    fn pod_device_num(&self, job_id: &str) -> usize {
        self.jobs
            .read()
            .get(job_id)
            .map(|j| j.pod_device_num)
            .unwrap_or(0)
    }
}

/// Report times collected from workloads, keyed by job and pod rank
#[derive(Debug, Default)]
pub struct ReportInfoCollector {
    reports: RwLock<HashMap<String, HashMap<String, i64>>>,
}

impl ReportInfoCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a pod rank acknowledged faults at `time_ms`
    pub fn report_fault(&self, job_id: &str, pod_rank: &str, time_ms: i64) {
        debug!(job = %job_id, pod_rank = %pod_rank, time_ms, "Workload reported fault");
        self.reports
            .write()
            .entry(job_id.to_string())
            .or_default()
            .insert(pod_rank.to_string(), time_ms);
    }

    pub fn clear_job(&self, job_id: &str) {
        self.reports.write().remove(job_id);
    }
}

impl ReportTimeProvider for ReportInfoCollector {
    fn single_process_fault_report_time(&self, job_id: &str, pod_rank: &str) -> i64 {
        self.reports
            .read()
            .get(job_id)
            .and_then(|ranks| ranks.get(pod_rank))
            .copied()
            .unwrap_or(JOB_SHOULD_REPORT_FAULT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = r#"
jobs:
  job-a:
    restartInPlace: true
    subHealthStrategy: graceExit
    podDeviceNum: 8
    servers:
      node1:
        DeviceList:
          - DeviceID: "0"
            RankID: "0"
          - DeviceID: "1"
            RankID: "1"
  job-b:
    servers: {}
"#;

    #[test]
    fn test_registry_from_yaml() {
        let registry = InMemoryJobRegistry::from_yaml(TABLE).unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.is_restart_in_place_enabled("job-a"));
        assert!(!registry.is_restart_in_place_enabled("job-b"));
        assert!(!registry.is_restart_in_place_enabled("missing"));
        assert_eq!(registry.sub_health_strategy("job-a"), SubHealthStrategy::GraceExit);
        assert_eq!(registry.sub_health_strategy("job-b"), SubHealthStrategy::Ignore);
        assert_eq!(registry.pod_device_num("job-a"), 8);

        let map = registry.job_server_info_map();
        assert_eq!(map["job-a"]["node1"].device_list[1].rank_id, "1");
    }

    #[test]
    fn test_registry_accepts_json() {
        let json = r#"{"jobs":{"j":{"restartInPlace":true,"podDeviceNum":1,"servers":{"n":{"DeviceList":[{"DeviceID":"3","RankID":"7"}]}}}}}"#;
        let registry = InMemoryJobRegistry::from_yaml(json).unwrap();
        assert!(registry.is_restart_in_place_enabled("j"));
        assert!(registry.remove_job("j"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_report_collector_defaults_to_sentinel() {
        let collector = ReportInfoCollector::new();
        assert_eq!(
            collector.single_process_fault_report_time("j", "0"),
            JOB_SHOULD_REPORT_FAULT
        );
        collector.report_fault("j", "0", 1234);
        assert_eq!(collector.single_process_fault_report_time("j", "0"), 1234);
        assert_eq!(
            collector.single_process_fault_report_time("j", "1"),
            JOB_SHOULD_REPORT_FAULT
        );
        collector.clear_job("j");
        assert_eq!(
            collector.single_process_fault_report_time("j", "0"),
            JOB_SHOULD_REPORT_FAULT
        );
    }
}
