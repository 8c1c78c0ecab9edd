//! Processor stages of the device domain
//!
//! - `JobRankFaultInfoProcessor`: read-only, per-job raw fault lists
//! - `RecoverInPlaceProcessor`: filters in-place recoverable faults

pub mod job_rank;
pub mod recover_in_place;

pub use job_rank::JobRankFaultInfoProcessor;
pub use recover_in_place::{
    fault_detail_can_do_restart_in_place, FilterRejection, RecoverInPlaceProcessor,
};
