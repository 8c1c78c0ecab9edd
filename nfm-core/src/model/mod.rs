//! Data model shared by the fault domains and processors

pub mod device;
pub mod job;
pub mod node;
pub mod switch;

pub use device::{
    AdvanceDeviceFaultCm, DeviceFault, FaultDeviceView, FaultTimeAndLevel, RawDeviceInfo,
    DEVICE_INFO_PREFIX,
};
pub use job::{
    Device, DeviceFaultDetail, FaultRank, HealthyState, JobFaultInfo, JobPodFaultDetail,
    JobServerInfoMap, ServerHccl, SingleProcessDeviceInfo, SingleProcessJobInfo,
    SingleProcessNodeInfo, INVALID_POD_RANK, JOB_SHOULD_REPORT_FAULT, MASTER_POD_RANK,
};
pub use node::{FaultDev, NodeInfo, NODE_INFO_PREFIX};
pub use switch::{
    SwitchFaultInfo, SwitchInfo, HEALTHY_STATE, SUB_HEALTHY_STATE, SWITCH_INFO_PREFIX, UNHEALTHY_STATE,
};
