//! Configuration module for NFM
//!
//! Handles loading and validating configuration from YAML files.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use nfm_core::FaultManagerConfig;

/// Metrics export configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether metrics are enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Port to expose metrics on
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Namespace of the fault ConfigMaps
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Debounce interval of the device domain
    #[serde(with = "humantime_serde", default = "default_device_interval")]
    pub device_interval: Duration,

    /// Debounce interval of the switch domain
    #[serde(with = "humantime_serde", default = "default_switch_interval")]
    pub switch_interval: Duration,

    /// Debounce interval of the node domain
    #[serde(with = "humantime_serde", default = "default_node_interval")]
    pub node_interval: Duration,

    /// Period of the reconciliation driver
    #[serde(with = "humantime_serde", default = "default_tick_interval")]
    pub tick_interval: Duration,

    /// Faults older than this are never filtered
    #[serde(with = "humantime_serde", default = "default_restart_in_place_timeout")]
    pub restart_in_place_timeout: Duration,

    /// Maximum number of cached nodes per fault domain
    #[serde(default = "default_max_node_num")]
    pub max_node_num: usize,

    /// Job rank table (YAML or JSON) for the in-memory job registry
    #[serde(default)]
    pub job_table: Option<PathBuf>,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Whether to watch fault ConfigMaps in the cluster
    #[serde(default = "default_true")]
    pub watch_configmaps: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            device_interval: default_device_interval(),
            switch_interval: default_switch_interval(),
            node_interval: default_node_interval(),
            tick_interval: default_tick_interval(),
            restart_in_place_timeout: default_restart_in_place_timeout(),
            max_node_num: default_max_node_num(),
            job_table: None,
            metrics: MetricsConfig::default(),
            watch_configmaps: true,
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("Failed to parse YAML configuration")
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            anyhow::bail!("namespace must not be empty");
        }
        if self.device_interval.is_zero() {
            anyhow::bail!("device_interval must be > 0");
        }
        if self.switch_interval.is_zero() {
            anyhow::bail!("switch_interval must be > 0");
        }
        if self.node_interval.is_zero() {
            anyhow::bail!("node_interval must be > 0");
        }
        if self.tick_interval.is_zero() {
            anyhow::bail!("tick_interval must be > 0");
        }
        if self.restart_in_place_timeout.is_zero() {
            anyhow::bail!("restart_in_place_timeout must be > 0");
        }
        if self.max_node_num == 0 {
            anyhow::bail!("max_node_num must be > 0");
        }
        if self.metrics.enabled && self.metrics.port == 0 {
            anyhow::bail!("metrics.port must be > 0 when metrics are enabled");
        }
        Ok(())
    }

    /// Settings handed to the fault manager
    pub fn to_manager_config(&self) -> FaultManagerConfig {
        FaultManagerConfig {
            device_interval: self.device_interval,
            switch_interval: self.switch_interval,
            node_interval: self.node_interval,
            tick_interval: self.tick_interval,
            restart_in_place_timeout: self.restart_in_place_timeout,
            max_node_num: self.max_node_num,
        }
    }
}

// Default value functions
fn default_namespace() -> String {
    "kube-system".to_string()
}

fn default_device_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_switch_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_node_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_tick_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_restart_in_place_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_max_node_num() -> usize {
    10_000
}

fn default_metrics_port() -> u16 {
    9100
}

fn default_true() -> bool {
    true
}
