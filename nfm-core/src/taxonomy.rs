//! Fault Taxonomy
//!
//! Static classification of NPU fault levels and of the per-job sub-health
//! strategies that decide which levels may be healed in place.
//!
//! Tiers, lowest first:
//! - L1: `NotHandleFault` (informational, never actionable)
//! - L2/L3: `RestartRequest`, `RestartBusiness` (eligible for in-place suppression)
//! - Sub-health: `SubHealthFault` (actionable unless the job ignores sub-health)
//! - Higher: NPU restart and separation levels (always escalated)

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Fault level reported by the device plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaultLevel {
    /// L1, no handling required
    NotHandleFault,
    /// L2, the workload should restart its step
    RestartRequest,
    /// L3, the workload process must restart
    RestartBusiness,
    /// Device can be restarted once idle
    FreeRestartNPU,
    /// Device must be restarted
    RestartNPU,
    /// Sub-health condition
    SubHealthFault,
    /// Device will be separated once idle
    PreSeparateNPU,
    /// Device must be separated
    SeparateNPU,
    /// Device was separated by an operator
    ManuallySeparateNPU,
}

impl FaultLevel {
    /// Wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultLevel::NotHandleFault => "NotHandleFault",
            FaultLevel::RestartRequest => "RestartRequest",
            FaultLevel::RestartBusiness => "RestartBusiness",
            FaultLevel::FreeRestartNPU => "FreeRestartNPU",
            FaultLevel::RestartNPU => "RestartNPU",
            FaultLevel::SubHealthFault => "SubHealthFault",
            FaultLevel::PreSeparateNPU => "PreSeparateNPU",
            FaultLevel::SeparateNPU => "SeparateNPU",
            FaultLevel::ManuallySeparateNPU => "ManuallySeparateNPU",
        }
    }

    /// Whether this is the lowest, never actionable tier
    pub fn is_l1(&self) -> bool {
        matches!(self, FaultLevel::NotHandleFault)
    }

    /// Whether this level belongs to the L2/L3 class
    pub fn is_l2_l3(&self) -> bool {
        matches!(self, FaultLevel::RestartRequest | FaultLevel::RestartBusiness)
    }
}

impl fmt::Display for FaultLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FaultLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NotHandleFault" => Ok(FaultLevel::NotHandleFault),
            "RestartRequest" => Ok(FaultLevel::RestartRequest),
            "RestartBusiness" => Ok(FaultLevel::RestartBusiness),
            "FreeRestartNPU" => Ok(FaultLevel::FreeRestartNPU),
            "RestartNPU" => Ok(FaultLevel::RestartNPU),
            "SubHealthFault" => Ok(FaultLevel::SubHealthFault),
            "PreSeparateNPU" => Ok(FaultLevel::PreSeparateNPU),
            "SeparateNPU" => Ok(FaultLevel::SeparateNPU),
            "ManuallySeparateNPU" => Ok(FaultLevel::ManuallySeparateNPU),
            other => Err(format!("unknown fault level {}", other)),
        }
    }
}

/// Per-job strategy for sub-health faults
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum SubHealthStrategy {
    /// Sub-health faults do not affect the job
    #[default]
    Ignore,
    /// Job exits gracefully on sub-health
    GraceExit,
    /// Job is killed on sub-health
    ForceExit,
    /// Job migrates to spare hardware on sub-health
    HotSwitch,
}

impl SubHealthStrategy {
    pub fn ignores_sub_health(&self) -> bool {
        matches!(self, SubHealthStrategy::Ignore)
    }
}

impl fmt::Display for SubHealthStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubHealthStrategy::Ignore => write!(f, "ignore"),
            SubHealthStrategy::GraceExit => write!(f, "graceExit"),
            SubHealthStrategy::ForceExit => write!(f, "forceExit"),
            SubHealthStrategy::HotSwitch => write!(f, "hotSwitch"),
        }
    }
}

/// Whether a raw level string is the L1 tier
pub fn is_l1_fault(level: &str) -> bool {
    level
        .parse::<FaultLevel>()
        .map(|l| l.is_l1())
        .unwrap_or(false)
}

/// Whether a raw level string is in the L2/L3 class
pub fn is_l2_l3_fault(level: &str) -> bool {
    level
        .parse::<FaultLevel>()
        .map(|l| l.is_l2_l3())
        .unwrap_or(false)
}

/// Whether a level still marks the card unhealthy
pub fn is_card_unhealthy_level(level: &str) -> bool {
    match level.parse::<FaultLevel>() {
        Ok(FaultLevel::NotHandleFault) | Ok(FaultLevel::SubHealthFault) => false,
        _ => true,
    }
}

/// Whether a set of levels can be healed in place under `strategy`
///
/// Every level must be L1, L2/L3, or sub-health when the strategy ignores it,
/// and at least one level must be L2/L3. Unknown levels veto.
pub fn is_recover_in_place_fault_levels(levels: &HashSet<&str>, strategy: SubHealthStrategy) -> bool {
    let mut has_l2_l3 = false;
    for raw in levels {
        match raw.parse::<FaultLevel>() {
            Ok(level) if level.is_l2_l3() => has_l2_l3 = true,
            Ok(FaultLevel::NotHandleFault) => {}
            Ok(FaultLevel::SubHealthFault) if strategy.ignores_sub_health() => {}
            _ => return false,
        }
    }
    has_l2_l3
}

/// Whether a set of levels contains a fault that impacts the NPU under `strategy`
pub fn fault_levels_has_npu_fault(levels: &HashSet<&str>, strategy: SubHealthStrategy) -> bool {
    levels.iter().any(|raw| match raw.parse::<FaultLevel>() {
        Ok(FaultLevel::NotHandleFault) => false,
        Ok(FaultLevel::SubHealthFault) => !strategy.ignores_sub_health(),
        _ => true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn levels<'a>(items: &[&'a str]) -> HashSet<&'a str> {
        items.iter().copied().collect()
    }

    #[test]
    fn test_level_round_trip_through_str() {
        for level in [
            FaultLevel::NotHandleFault,
            FaultLevel::RestartBusiness,
            FaultLevel::ManuallySeparateNPU,
        ] {
            assert_eq!(level.as_str().parse::<FaultLevel>().unwrap(), level);
        }
        assert!("Bogus".parse::<FaultLevel>().is_err());
    }

    #[test]
    fn test_l2_l3_class() {
        assert!(is_l2_l3_fault("RestartRequest"));
        assert!(is_l2_l3_fault("RestartBusiness"));
        assert!(!is_l2_l3_fault("RestartNPU"));
        assert!(!is_l2_l3_fault("NotHandleFault"));
        assert!(is_l1_fault("NotHandleFault"));
        assert!(!is_l1_fault("unknown"));
    }

    #[test]
    fn test_recoverable_requires_l2_l3() {
        let s = SubHealthStrategy::Ignore;
        assert!(is_recover_in_place_fault_levels(&levels(&["RestartBusiness"]), s));
        assert!(is_recover_in_place_fault_levels(
            &levels(&["NotHandleFault", "RestartRequest"]),
            s
        ));
        assert!(!is_recover_in_place_fault_levels(&levels(&["NotHandleFault"]), s));
        assert!(!is_recover_in_place_fault_levels(
            &levels(&["RestartBusiness", "SeparateNPU"]),
            s
        ));
        assert!(!is_recover_in_place_fault_levels(
            &levels(&["RestartBusiness", "SomethingNew"]),
            s
        ));
    }

    #[test]
    fn test_sub_health_depends_on_strategy() {
        let set = levels(&["RestartBusiness", "SubHealthFault"]);
        assert!(is_recover_in_place_fault_levels(&set, SubHealthStrategy::Ignore));
        assert!(!is_recover_in_place_fault_levels(&set, SubHealthStrategy::GraceExit));

        let only_sub_health = levels(&["SubHealthFault"]);
        assert!(!fault_levels_has_npu_fault(&only_sub_health, SubHealthStrategy::Ignore));
        assert!(fault_levels_has_npu_fault(&only_sub_health, SubHealthStrategy::GraceExit));
    }

    #[test]
    fn test_strategy_wire_format() {
        let s: SubHealthStrategy = serde_json::from_str("\"graceExit\"").unwrap();
        assert_eq!(s, SubHealthStrategy::GraceExit);
        assert_eq!(SubHealthStrategy::default(), SubHealthStrategy::Ignore);
        assert_eq!(SubHealthStrategy::HotSwitch.to_string(), "hotSwitch");
    }
}
