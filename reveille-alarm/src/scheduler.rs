//! Global wake scheduling.
//!
//! Each alarm contributes at most one pending wake. The scheduler keeps
//! those in an ordered index and makes sure exactly the earliest one is
//! armed with the [`WakeTimer`], or nothing when no alarm is pending.
//!
//! Index maintenance and the timer calls happen under one async mutex, so
//! two recomputes never interleave their cancel/arm sequences.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::{Mutex, watch};

use crate::alarm::{AlarmId, AlarmState};
use crate::error::Result;
use crate::tracing::prelude::*;
use crate::wake::{ScheduledWake, WakeTimer, WakeTimerError};

/// What the scheduler is currently trying to arm.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStatus {
    /// Earliest pending wake over all alarms.
    pub next: Option<ScheduledWake>,
    /// Last arm/cancel failure, cleared once a recompute succeeds.
    pub fault: Option<String>,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    wake: Option<ScheduledWake>,
    revision: u64,
}

impl Entry {
    /// Left behind by [`Scheduler::forget`]. Ids are never reused, so a
    /// deleted alarm stays deleted even if a late notification arrives.
    const TOMBSTONE: Entry = Entry {
        wake: None,
        revision: u64::MAX,
    };
}

/// Deleted alarms remembered at once. A state notification can only trail
/// its alarm's deletion by one in-flight announcement, so older tombstones
/// are dropped.
const TOMBSTONE_LIMIT: usize = 256;

#[derive(Debug, Default)]
struct SchedulerState {
    index: BTreeSet<ScheduledWake>,
    entries: HashMap<AlarmId, Entry>,
    tombstones: VecDeque<AlarmId>,
    armed: Option<ScheduledWake>,
    fault: Option<String>,
}

impl SchedulerState {
    fn record(&mut self, id: AlarmId, revision: u64, state: &AlarmState) {
        if let Some(entry) = self.entries.get(&id) {
            if revision < entry.revision {
                trace!(alarm = %id, revision, cached = entry.revision, "Ignoring outdated state");
                return;
            }
            if let Some(wake) = entry.wake {
                self.index.remove(&wake);
            }
        }

        let wake = state
            .pending_wake()
            .map(|(at, kind)| ScheduledWake { at, id, kind });
        if let Some(wake) = wake {
            self.index.insert(wake);
        }
        self.entries.insert(id, Entry { wake, revision });
    }

    fn forget(&mut self, id: AlarmId) {
        if let Some(Entry {
            wake: Some(wake), ..
        }) = self.entries.insert(id, Entry::TOMBSTONE)
        {
            self.index.remove(&wake);
        }

        self.tombstones.push_back(id);
        if self.tombstones.len() > TOMBSTONE_LIMIT {
            if let Some(oldest) = self.tombstones.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    fn desired(&self) -> Option<ScheduledWake> {
        self.index.first().copied()
    }
}

pub struct Scheduler {
    timer: Arc<dyn WakeTimer>,
    state: Mutex<SchedulerState>,
    status_tx: watch::Sender<SchedulerStatus>,
}

impl Scheduler {
    pub fn new(timer: Arc<dyn WakeTimer>) -> Self {
        Self {
            timer,
            state: Mutex::new(SchedulerState::default()),
            status_tx: watch::Sender::new(SchedulerStatus::default()),
        }
    }

    /// Update the alarm's pending wake and re-arm if the minimum changed.
    ///
    /// `revision` must increase with every committed state of the alarm;
    /// a notification older than the cached one is dropped.
    pub async fn on_alarm_state_changed(
        &self,
        id: AlarmId,
        revision: u64,
        state: &AlarmState,
    ) -> Result<()> {
        let mut inner = self.state.lock().await;
        inner.record(id, revision, state);
        self.settle_locked(&mut inner, false).await
    }

    /// Update the index without touching the timer. Used while a batch of
    /// alarms is refreshed; follow with [`settle`](Self::settle).
    pub async fn record(&self, id: AlarmId, revision: u64, state: &AlarmState) {
        self.state.lock().await.record(id, revision, state);
    }

    /// Drop a deleted alarm and re-arm for whatever is next.
    pub async fn forget(&self, id: AlarmId) -> Result<()> {
        let mut inner = self.state.lock().await;
        inner.forget(id);
        self.settle_locked(&mut inner, false).await
    }

    /// Bring the armed wake in line with the index.
    ///
    /// A pending fault always causes a fresh attempt. With `force`, the
    /// wake is re-armed even if unchanged, which is needed after the wall
    /// clock moved since the timer may count relative time.
    pub async fn settle(&self, force: bool) -> Result<()> {
        let mut inner = self.state.lock().await;
        self.settle_locked(&mut inner, force).await
    }

    /// A wake for `id` was delivered. Returns whether it was the armed one.
    ///
    /// The armed slot is cleared so the next recompute arms again, even for
    /// the same instant if the alarm rejects the wake as early.
    pub async fn on_wake(&self, id: AlarmId) -> bool {
        let mut inner = self.state.lock().await;
        match inner.armed {
            Some(wake) if wake.id == id => {
                inner.armed = None;
                true
            }
            _ => false,
        }
    }

    pub async fn armed(&self) -> Option<ScheduledWake> {
        self.state.lock().await.armed
    }

    pub fn status(&self) -> SchedulerStatus {
        self.status_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SchedulerStatus> {
        self.status_tx.subscribe()
    }

    async fn settle_locked(&self, inner: &mut SchedulerState, force: bool) -> Result<()> {
        let desired = inner.desired();

        let result = if desired == inner.armed && inner.fault.is_none() && !force {
            Ok(())
        } else {
            self.rearm(inner, desired).await
        };

        match &result {
            Ok(()) => {
                if inner.fault.take().is_some() {
                    info!("Wake scheduling recovered");
                }
            }
            Err(e) => {
                warn!(error = %e, next = ?desired, "Failed to arm wake timer");
                inner.fault = Some(e.to_string());
            }
        }

        let status = SchedulerStatus {
            next: desired,
            fault: inner.fault.clone(),
        };
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });

        result.map_err(Into::into)
    }

    async fn rearm(
        &self,
        inner: &mut SchedulerState,
        desired: Option<ScheduledWake>,
    ) -> Result<(), WakeTimerError> {
        if let Some(armed) = inner.armed {
            // Arming the same id replaces its wake; no separate cancel.
            if desired.map(|wake| wake.id) != Some(armed.id) {
                self.timer.cancel(armed.id).await?;
                debug!(alarm = %armed.id, "Wake cancelled");
            }
            inner.armed = None;
        }

        if let Some(wake) = desired {
            self.timer.arm(wake).await?;
            debug!(alarm = %wake.id, at = %wake.at, kind = %wake.kind, "Wake armed");
            inner.armed = Some(wake);
        }
        Ok(())
    }
}
