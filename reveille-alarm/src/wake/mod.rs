//! One-shot wake timers.
//!
//! The scheduler arms exactly one wake at a time through a [`WakeTimer`].
//! When it elapses the backend delivers the alarm id on its wake channel,
//! and the manager feeds it to the alarm's state machine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::alarm::{AlarmId, WakeKind};

#[cfg(test)]
pub mod fake;
mod tokio_timer;

pub use tokio_timer::TokioWakeTimer;

/// A wake the scheduler wants delivered.
///
/// Field order makes the derived ordering "earliest first", with ties
/// broken by id and then kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScheduledWake {
    pub at: DateTime<Utc>,
    pub id: AlarmId,
    pub kind: WakeKind,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WakeTimerError {
    #[error("wake timer unavailable: {0}")]
    Unavailable(String),

    #[error("wake channel closed")]
    Closed,
}

/// Platform facility able to wake the process at an absolute instant.
#[async_trait]
pub trait WakeTimer: Send + Sync {
    /// Arm a wake, replacing any wake already armed for the same alarm.
    async fn arm(&self, wake: ScheduledWake) -> Result<(), WakeTimerError>;

    /// Cancel the wake armed for `id`. Cancelling nothing is not an error.
    async fn cancel(&self, id: AlarmId) -> Result<(), WakeTimerError>;
}
