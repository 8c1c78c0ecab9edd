//! Kubernetes Client wrapper
//!
//! Provides the ConfigMap access the fault manager needs.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, ListParams};
use kube::{Client, Config, ResourceExt};
use tracing::{debug, info};

use nfm_core::ConfigMapKind;

/// Kubernetes client wrapper
#[derive(Clone)]
pub struct K8sClient {
    client: Client,
}

impl K8sClient {
    /// Create a new K8s client using in-cluster config
    pub async fn new() -> Result<Self> {
        let client = Client::try_default()
            .await
            .context("Failed to create Kubernetes client")?;

        info!("Connected to Kubernetes API server");
        Ok(Self { client })
    }

    /// Create a new K8s client with custom config
    pub fn with_config(config: Config) -> Result<Self> {
        let client = Client::try_from(config)
            .context("Failed to create Kubernetes client from config")?;

        Ok(Self { client })
    }

    /// Get the underlying kube client
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Get ConfigMap API for a namespace
    pub fn config_maps(&self, namespace: &str) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), namespace)
    }

    /// List the fault ConfigMaps of a namespace
    pub async fn list_fault_config_maps(&self, namespace: &str) -> Result<Vec<ConfigMap>> {
        let list = self
            .config_maps(namespace)
            .list(&ListParams::default())
            .await
            .with_context(|| format!("Failed to list configmaps in {}", namespace))?;

        let fault_cms: Vec<ConfigMap> = list
            .items
            .into_iter()
            .filter(|cm| ConfigMapKind::from_name(&cm.name_any()).is_some())
            .collect();
        debug!(namespace = namespace, count = fault_cms.len(), "Listed fault configmaps");
        Ok(fault_cms)
    }

    /// Check if the API server is reachable
    pub async fn health_check(&self, namespace: &str) -> Result<()> {
        let _ = self
            .config_maps(namespace)
            .list(&ListParams::default().limit(1))
            .await
            .context("Failed to list configmaps")?;
        Ok(())
    }
}

/// String data of a ConfigMap, empty when it has none
pub fn config_map_data(cm: &ConfigMap) -> BTreeMap<String, String> {
    cm.data.clone().unwrap_or_default()
}
