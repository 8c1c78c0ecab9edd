//! NFM Kubernetes Integration
//!
//! Provides the Kubernetes client and the fault ConfigMap watcher for NPU Fault Manager.

pub mod client;
pub mod watcher;

pub use client::K8sClient;
pub use watcher::ConfigMapWatcher;
