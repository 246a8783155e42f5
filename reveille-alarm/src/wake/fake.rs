//! Recording wake timer for tests.

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{ScheduledWake, WakeTimer, WakeTimerError};
use crate::alarm::AlarmId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerCall {
    Arm(ScheduledWake),
    Cancel(AlarmId),
}

/// Records every call and can be switched into a failing mode.
#[derive(Debug, Default)]
pub struct FakeWakeTimer {
    calls: Mutex<Vec<TimerCall>>,
    armed: Mutex<Option<ScheduledWake>>,
    failing: Mutex<bool>,
}

impl FakeWakeTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<TimerCall> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// The wake a real backend would currently deliver.
    pub fn armed(&self) -> Option<ScheduledWake> {
        *self.armed.lock()
    }

    /// Simulate delivery: the armed wake elapses and is no longer armed.
    pub fn take_armed(&self) -> Option<ScheduledWake> {
        self.armed.lock().take()
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }

    fn check(&self) -> Result<(), WakeTimerError> {
        if *self.failing.lock() {
            Err(WakeTimerError::Unavailable("injected failure".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl WakeTimer for FakeWakeTimer {
    async fn arm(&self, wake: ScheduledWake) -> Result<(), WakeTimerError> {
        self.check()?;
        self.calls.lock().push(TimerCall::Arm(wake));
        *self.armed.lock() = Some(wake);
        Ok(())
    }

    async fn cancel(&self, id: AlarmId) -> Result<(), WakeTimerError> {
        self.check()?;
        self.calls.lock().push(TimerCall::Cancel(id));
        let mut armed = self.armed.lock();
        if armed.is_some_and(|wake| wake.id == id) {
            *armed = None;
        }
        Ok(())
    }
}
