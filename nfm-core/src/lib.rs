//! NFM Core Library
//!
//! Cluster-level NPU fault management: ingests per-node fault reports,
//! correlates them with the jobs running on those nodes, and filters faults
//! that a job can recover from in place.

pub mod configmap;
pub mod correlator;
pub mod error;
pub mod manager;
pub mod metrics;
pub mod model;
pub mod normalizer;
pub mod processor;
pub mod provider;
pub mod snapshot;
pub mod taxonomy;

// Re-export common types
pub use configmap::{ConfigMapKind, FaultConfigMap};
pub use error::FaultError;
pub use manager::{FaultManager, FaultManagerConfig};
pub use model::{AdvanceDeviceFaultCm, DeviceFault, JobFaultInfo, NodeInfo, RawDeviceInfo, SwitchInfo};
pub use provider::{InMemoryJobRegistry, JobInfoProvider, ReportInfoCollector, ReportTimeProvider};
pub use snapshot::{FaultDomain, FaultFilter, FaultObserver, FaultSnapshot, SnapshotCenter, Stage};
pub use taxonomy::{FaultLevel, SubHealthStrategy};
