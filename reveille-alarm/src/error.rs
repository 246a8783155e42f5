//! Error types for alarm operations.

use crate::alarm::AlarmId;
use crate::alarm::machine::Rejection;
use crate::store::StoreError;
use crate::wake::WakeTimerError;

/// Errors surfaced by [`AlarmsManager`](crate::manager::AlarmsManager)
/// operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The operation referenced an alarm that does not exist. Nothing changed.
    #[error("alarm {0} not found")]
    NotFound(AlarmId),

    /// Malformed alarm definition. The previous value is retained.
    #[error("invalid alarm value: {0}")]
    InvalidValue(String),

    /// A user event that is not valid in the alarm's current state.
    #[error("{event} rejected for alarm {id}: {reason}")]
    Rejected {
        id: AlarmId,
        event: &'static str,
        reason: Rejection,
    },

    /// A wake delivered to an alarm that no longer expects it.
    #[error("stale wake for alarm {id}: {reason}")]
    StaleEvent { id: AlarmId, reason: Rejection },

    /// Arming or cancelling the wake timer failed. Retried on the next
    /// recompute.
    #[error("scheduling fault: {0}")]
    SchedulingFault(#[from] WakeTimerError),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
