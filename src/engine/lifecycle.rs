//! Creation, deletion and rescheduling rules that do not depend on other
//! records. Conflict scanning lives in `conflict`.

use crate::model::*;

use super::EngineError;

/// Confirmed logs are append-only.
pub fn check_commitment_deletable(commitment: &Commitment) -> Result<(), EngineError> {
    match commitment.status {
        CommitmentStatus::Confirmed => Err(EngineError::Immutable {
            id: commitment.id,
            reason: "confirmed logs cannot be deleted",
        }),
        CommitmentStatus::Proposed | CommitmentStatus::Cancelled => Ok(()),
    }
}

/// Maintenance may only be placed strictly after `now`.
pub fn check_future_start(start: Ms, now: Ms) -> Result<(), EngineError> {
    if start <= now {
        return Err(EngineError::PastScheduling { start, now });
    }
    Ok(())
}

/// A window can be rescheduled or cancelled until it is cancelled or elapsed.
pub fn check_window_mutable(window: &MaintenanceWindow, now: Ms) -> Result<(), EngineError> {
    match window.phase(now) {
        WindowPhase::Scheduled | WindowPhase::InProgress => Ok(()),
        WindowPhase::Cancelled => Err(EngineError::Immutable {
            id: window.id,
            reason: "maintenance window is cancelled",
        }),
        WindowPhase::Completed => Err(EngineError::Immutable {
            id: window.id,
            reason: "maintenance window has completed",
        }),
    }
}
