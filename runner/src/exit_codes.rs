//! Stable exit codes for plan-runner CLI commands.

use crate::orchestrator::RunStop;

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid input, configuration or state, or any other error.
pub const INVALID: i32 = 1;
/// `run` found no eligible task.
pub const NO_ELIGIBLE: i32 = 2;
/// `run` stopped on a failed task.
pub const FAILED: i32 = 3;
/// `run` reached a ship task without `--ship`.
pub const SHIP_CONFIRMATION: i32 = 4;

/// Exit code for a finished `run`.
pub fn for_stop(stop: &RunStop) -> i32 {
    match stop {
        RunStop::Success => OK,
        RunStop::NoEligibleTask => NO_ELIGIBLE,
        RunStop::PartialFailure { .. } => FAILED,
        RunStop::ShipConfirmationRequired { .. } => SHIP_CONFIRMATION,
    }
}
