//! Stable exit codes for `dropconvert` commands.

use crate::error::ConversionFailure;
use crate::orchestrator::ConversionOutcome;

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid config or arguments, a failed conversion, or an unready environment.
pub const FAILED: i32 = 1;
/// A conversion was refused before anything was written or launched.
pub const ABORTED: i32 = 2;
/// The conversion entrypoint exceeded its timeout.
pub const TIMED_OUT: i32 = 3;

pub fn for_outcome(outcome: &ConversionOutcome) -> i32 {
    match outcome {
        ConversionOutcome::Succeeded(_) => OK,
        ConversionOutcome::Aborted(_) => ABORTED,
        ConversionOutcome::Failed(ConversionFailure::TimedOut { .. }) => TIMED_OUT,
        ConversionOutcome::Failed(_) => FAILED,
    }
}
