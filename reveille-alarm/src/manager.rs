//! Public façade over the alarm set.
//!
//! The manager owns every live [`Alarm`] in a slot arena, one async mutex
//! per slot so that events for the same alarm are applied one at a time in
//! arrival order. A mutation runs the alarm's state machine, persists the
//! result, commits it in memory and broadcasts its effects. Only after the
//! per-alarm lock is released does it tell the [`Scheduler`] and republish
//! the alarm list.
//!
//! ```text
//!   API / wake / clock events
//!              │
//!              ▼
//!   ┌─────────────────────┐  save   ┌────────────┐
//!   │ per-alarm lock      ├────────►│ AlarmStore │
//!   │ machine transition  │         └────────────┘
//!   └──────────┬──────────┘
//!              │ (id, revision, state)
//!              ▼
//!   ┌─────────────────────┐  arm/cancel  ┌───────────┐
//!   │ Scheduler           ├─────────────►│ WakeTimer │
//!   └─────────────────────┘              └─────┬─────┘
//!              ▲              wake (AlarmId)   │
//!              └───────────────────────────────┘
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use slotmap::{SlotMap, new_key_type};
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use ulid::Ulid;

use crate::alarm::machine::{self, Effect, Transition};
use crate::alarm::{Alarm, AlarmId, AlarmRecord, AlarmState, AlarmValue};
use crate::clock::{Clock, ClockEvent};
use crate::error::{Error, Result};
use crate::scheduler::{Scheduler, SchedulerStatus};
use crate::store::AlarmStore;
use crate::tracing::prelude::*;
use crate::wake::WakeTimer;

const NOTIFICATION_CAPACITY: usize = 64;

/// A side effect of a committed transition, for presentation and sound
/// playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlarmNotification {
    pub id: AlarmId,
    pub effect: Effect,
}

new_key_type! {
    struct SlotKey;
}

struct Slot {
    cell: Arc<Mutex<Alarm>>,
    /// Last committed snapshot, readable without taking the alarm's lock.
    record: AlarmRecord,
}

#[derive(Default)]
struct Registry {
    slots: SlotMap<SlotKey, Slot>,
    index: BTreeMap<AlarmId, SlotKey>,
}

impl Registry {
    fn insert(&mut self, record: AlarmRecord) {
        let id = record.id;
        let cell = Arc::new(Mutex::new(Alarm::new(record.clone())));
        let key = self.slots.insert(Slot { cell, record });
        if let Some(old) = self.index.insert(id, key) {
            self.slots.remove(old);
        }
    }

    fn cell(&self, id: AlarmId) -> Option<Arc<Mutex<Alarm>>> {
        let key = self.index.get(&id)?;
        self.slots.get(*key).map(|slot| slot.cell.clone())
    }

    fn cells(&self) -> Vec<Arc<Mutex<Alarm>>> {
        self.index
            .values()
            .filter_map(|key| self.slots.get(*key))
            .map(|slot| slot.cell.clone())
            .collect()
    }

    fn record(&self, id: AlarmId) -> Option<AlarmRecord> {
        let key = self.index.get(&id)?;
        self.slots.get(*key).map(|slot| slot.record.clone())
    }

    fn records(&self) -> Vec<AlarmRecord> {
        self.index
            .values()
            .filter_map(|key| self.slots.get(*key))
            .map(|slot| slot.record.clone())
            .collect()
    }

    fn update(&mut self, record: AlarmRecord) {
        if let Some(slot) = self
            .index
            .get(&record.id)
            .and_then(|key| self.slots.get_mut(*key))
        {
            slot.record = record;
        }
    }

    fn remove(&mut self, id: AlarmId) {
        if let Some(key) = self.index.remove(&id) {
            self.slots.remove(key);
        }
    }
}

/// Proposed new value and transition for one alarm.
struct Change {
    value: AlarmValue,
    transition: Transition,
}

/// A committed change, ready to be announced.
struct Committed {
    id: AlarmId,
    revision: u64,
    state: AlarmState,
    effects: Vec<Effect>,
    deleted: bool,
}

impl Committed {
    fn unchanged(alarm: &Alarm) -> Self {
        Self {
            id: alarm.id,
            revision: alarm.revision,
            state: alarm.state,
            effects: Vec::new(),
            deleted: false,
        }
    }
}

struct Inner {
    store: Arc<dyn AlarmStore>,
    clock: Arc<dyn Clock>,
    scheduler: Scheduler,
    registry: parking_lot::Mutex<Registry>,
    ids: parking_lot::Mutex<ulid::Generator>,
    alarms_tx: watch::Sender<Vec<AlarmRecord>>,
    notify_tx: broadcast::Sender<AlarmNotification>,
}

/// Cheap to clone; all clones share the same alarms.
#[derive(Clone)]
pub struct AlarmsManager {
    inner: Arc<Inner>,
}

impl AlarmsManager {
    pub fn new(
        store: Arc<dyn AlarmStore>,
        clock: Arc<dyn Clock>,
        timer: Arc<dyn WakeTimer>,
    ) -> Self {
        let (notify_tx, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                store,
                clock,
                scheduler: Scheduler::new(timer),
                registry: parking_lot::Mutex::new(Registry::default()),
                ids: parking_lot::Mutex::new(ulid::Generator::new()),
                alarms_tx: watch::Sender::new(Vec::new()),
                notify_tx,
            }),
        }
    }

    pub fn clock(&self) -> &dyn Clock {
        &*self.inner.clock
    }

    /// Load persisted alarms and bring them up to date.
    ///
    /// Wakes missed while the process was not running fire immediately.
    pub async fn load(&self) -> Result<()> {
        let records = self.inner.store.load_all().await?;
        let count = records.len();
        {
            let mut registry = self.inner.registry.lock();
            for record in records {
                registry.insert(record);
            }
        }
        info!(count, "Loaded alarms");
        self.on_boot().await;
        Ok(())
    }

    /// Create an alarm and arm it. Returns the new id.
    pub async fn create(&self, value: AlarmValue) -> Result<AlarmId> {
        value.validate()?;

        let id = self.next_id();
        let transition = machine::enable(&value, self.inner.clock.now(), self.clock());
        let mut value = value;
        value.enabled = transition.state.is_live();
        let record = AlarmRecord {
            id,
            value,
            state: transition.state,
        };
        self.inner.store.save(&record).await?;
        self.inner.registry.lock().insert(record);

        info!(alarm = %id, state = %transition.state, "Alarm created");
        let committed = Committed {
            id,
            revision: 0,
            state: transition.state,
            effects: transition.effects,
            deleted: false,
        };
        self.broadcast(&committed);
        self.announce(committed).await;
        Ok(id)
    }

    /// Replace an alarm's definition. Anything sounding is silenced and the
    /// alarm is re-armed from the new value.
    pub async fn update(&self, id: AlarmId, value: AlarmValue) -> Result<()> {
        value.validate()?;
        self.transition(id, |alarm, now| {
            let transition = machine::reconfigure(&value, &alarm.state, now, self.clock());
            Ok(Some(Change { value, transition }))
        })
        .await?;
        info!(alarm = %id, "Alarm updated");
        Ok(())
    }

    /// Enable or disable an alarm. Setting the current flag is a no-op.
    pub async fn set_enabled(&self, id: AlarmId, enabled: bool) -> Result<()> {
        self.transition(id, |alarm, now| {
            if alarm.value.enabled == enabled {
                return Ok(None);
            }
            let value = AlarmValue {
                enabled,
                ..alarm.value.clone()
            };
            let transition = machine::reconfigure(&value, &alarm.state, now, self.clock());
            Ok(Some(Change { value, transition }))
        })
        .await
    }

    pub async fn delete(&self, id: AlarmId) -> Result<()> {
        let cell = self.cell(id)?;
        let committed = {
            let mut alarm = cell.lock().await;
            if alarm.deleted {
                return Err(Error::NotFound(id));
            }
            self.inner.store.delete(id).await?;
            alarm.deleted = true;
            alarm.revision += 1;
            self.inner.registry.lock().remove(id);
            let committed = Committed {
                id,
                revision: u64::MAX,
                state: AlarmState::Disabled,
                effects: silence_effect(&alarm.state),
                deleted: true,
            };
            self.broadcast(&committed);
            committed
        };

        info!(alarm = %id, "Alarm deleted");
        self.announce(committed).await;
        Ok(())
    }

    /// Finish the current occurrence. See [`machine::dismiss`].
    pub async fn dismiss(&self, id: AlarmId) -> Result<()> {
        self.transition(id, |alarm, now| {
            machine::dismiss(&alarm.value, &alarm.state, now, self.clock())
                .map(|transition| {
                    Some(Change {
                        value: alarm.value.clone(),
                        transition,
                    })
                })
                .map_err(|reason| Error::Rejected {
                    id,
                    event: "dismiss",
                    reason,
                })
        })
        .await?;
        info!(alarm = %id, "Alarm dismissed");
        Ok(())
    }

    /// Silence a ringing alarm for `delta`, or its configured snooze
    /// duration.
    pub async fn snooze(&self, id: AlarmId, delta: Option<TimeDelta>) -> Result<()> {
        if let Some(delta) = delta {
            if delta <= TimeDelta::zero() {
                return Err(Error::InvalidValue(format!(
                    "snooze duration must be positive, got {delta}"
                )));
            }
        }
        self.transition(id, |alarm, now| {
            machine::snooze(&alarm.value, &alarm.state, now, delta)
                .map(|transition| {
                    Some(Change {
                        value: alarm.value.clone(),
                        transition,
                    })
                })
                .map_err(|reason| Error::Rejected {
                    id,
                    event: "snooze",
                    reason,
                })
        })
        .await?;
        info!(alarm = %id, "Alarm snoozed");
        Ok(())
    }

    /// All alarms in creation order.
    pub fn get_all(&self) -> Vec<AlarmRecord> {
        self.inner.registry.lock().records()
    }

    pub fn get(&self, id: AlarmId) -> Result<AlarmRecord> {
        self.inner
            .registry
            .lock()
            .record(id)
            .ok_or(Error::NotFound(id))
    }

    pub fn next_wake(&self) -> SchedulerStatus {
        self.inner.scheduler.status()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<AlarmRecord>> {
        self.inner.alarms_tx.subscribe()
    }

    pub fn subscribe_next_wake(&self) -> watch::Receiver<SchedulerStatus> {
        self.inner.scheduler.subscribe()
    }

    pub fn notifications(&self) -> broadcast::Receiver<AlarmNotification> {
        self.inner.notify_tx.subscribe()
    }

    /// Deliver a wake from the timer to its alarm.
    ///
    /// Wakes the alarm no longer expects are logged and dropped, and the
    /// scheduler re-arms whatever is pending.
    pub async fn on_wake(&self, id: AlarmId) -> Result<()> {
        if !self.inner.scheduler.on_wake(id).await {
            debug!(alarm = %id, "Wake was not the armed one");
        }

        match self.fire(id).await {
            Ok(()) => Ok(()),
            Err(Error::StaleEvent { id, reason }) => {
                debug!(alarm = %id, %reason, "Ignoring wake");
                self.retry_scheduling().await;
                Ok(())
            }
            Err(Error::NotFound(id)) => {
                debug!(alarm = %id, "Wake for deleted alarm");
                self.retry_scheduling().await;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Bring every alarm up to date after start-up.
    pub async fn on_boot(&self) {
        self.refresh_all("boot").await;
    }

    /// The wall clock jumped.
    pub async fn on_time_changed(&self) {
        self.refresh_all("time changed").await;
    }

    /// The local timezone or UTC offset changed.
    pub async fn on_timezone_changed(&self) {
        self.refresh_all("timezone changed").await;
    }

    /// Re-arm after a scheduling fault or a wake that could not be
    /// committed.
    pub async fn retry_scheduling(&self) {
        if let Err(e) = self.inner.scheduler.settle(false).await {
            debug!(error = %e, "Wake scheduling still failing");
        }
    }

    /// Process wakes and clock events until `shutdown` is cancelled.
    pub async fn run(
        self,
        mut wake_rx: mpsc::Receiver<AlarmId>,
        mut clock_rx: mpsc::Receiver<ClockEvent>,
        retry_interval: Duration,
        shutdown: CancellationToken,
    ) {
        let mut retry = tokio::time::interval(retry_interval);
        retry.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    break;
                }
                Some(id) = wake_rx.recv() => {
                    if let Err(e) = self.on_wake(id).await {
                        error!(alarm = %id, error = %e, "Failed to handle wake");
                    }
                }
                Some(event) = clock_rx.recv() => {
                    match event {
                        ClockEvent::TimeChanged => self.on_time_changed().await,
                        ClockEvent::TimezoneChanged => self.on_timezone_changed().await,
                    }
                }
                _ = retry.tick() => {
                    self.retry_scheduling().await;
                }
            }
        }

        debug!("Alarms manager stopped");
    }

    async fn fire(&self, id: AlarmId) -> Result<()> {
        self.transition(id, |alarm, now| {
            machine::fire(&alarm.value, &alarm.state, now, self.clock())
                .map(|transition| {
                    Some(Change {
                        value: alarm.value.clone(),
                        transition,
                    })
                })
                .map_err(|reason| Error::StaleEvent { id, reason })
        })
        .await
    }

    /// Run one event against one alarm under its lock.
    ///
    /// `decide` returns `None` for a no-op.
    async fn transition<F>(&self, id: AlarmId, decide: F) -> Result<()>
    where
        F: FnOnce(&Alarm, DateTime<Utc>) -> Result<Option<Change>>,
    {
        let cell = self.cell(id)?;
        let committed = {
            let mut alarm = cell.lock().await;
            if alarm.deleted {
                return Err(Error::NotFound(id));
            }
            let now = self.inner.clock.now();
            let Some(change) = decide(&*alarm, now)? else {
                return Ok(());
            };
            self.commit(&mut alarm, change).await?
        };
        self.announce(committed).await;
        Ok(())
    }

    /// Persist a change, then apply it to the live alarm and broadcast its
    /// effects. Called under the alarm's lock, so effects go out in commit
    /// order.
    ///
    /// On a storage error the alarm is left exactly as it was.
    async fn commit(&self, alarm: &mut Alarm, change: Change) -> Result<Committed> {
        let Change {
            mut value,
            transition,
        } = change;
        value.enabled = transition.state.is_live();
        let deleted = transition.deletes();
        let record = AlarmRecord {
            id: alarm.id,
            value,
            state: transition.state,
        };

        if deleted {
            self.inner.store.delete(alarm.id).await?;
        } else {
            self.inner.store.save(&record).await?;
        }

        if alarm.state != record.state {
            debug!(alarm = %alarm.id, from = %alarm.state, to = %record.state, "Alarm state changed");
        }
        alarm.revision += 1;
        alarm.value = record.value.clone();
        alarm.state = record.state;
        if deleted {
            alarm.deleted = true;
            self.inner.registry.lock().remove(alarm.id);
        } else {
            self.inner.registry.lock().update(record);
        }

        let committed = Committed {
            id: alarm.id,
            revision: alarm.revision,
            state: alarm.state,
            effects: transition.effects,
            deleted,
        };
        self.broadcast(&committed);
        Ok(committed)
    }

    async fn announce(&self, committed: Committed) {
        let scheduled = if committed.deleted {
            self.inner.scheduler.forget(committed.id).await
        } else {
            self.inner
                .scheduler
                .on_alarm_state_changed(committed.id, committed.revision, &committed.state)
                .await
        };
        if let Err(e) = scheduled {
            warn!(alarm = %committed.id, error = %e, "Wake not armed, will retry");
        }

        self.publish_list();
    }

    async fn refresh_all(&self, reason: &'static str) {
        let cells = self.inner.registry.lock().cells();
        debug!(reason, count = cells.len(), "Refreshing alarms");

        for cell in cells {
            let committed = {
                let mut alarm = cell.lock().await;
                if alarm.deleted {
                    continue;
                }

                let now = self.inner.clock.now();
                let transition = if alarm.value.enabled && !alarm.state.is_live() {
                    warn!(alarm = %alarm.id, "Enabled alarm found disabled, re-enabling");
                    machine::enable(&alarm.value, now, self.clock())
                } else {
                    machine::refresh(&alarm.value, &alarm.state, now, self.clock())
                };

                if transition.state == alarm.state && transition.effects.is_empty() {
                    Committed::unchanged(&alarm)
                } else {
                    let value = alarm.value.clone();
                    match self.commit(&mut alarm, Change { value, transition }).await {
                        Ok(committed) => committed,
                        Err(e) => {
                            warn!(alarm = %alarm.id, reason, error = %e, "Failed to persist refreshed alarm");
                            Committed::unchanged(&alarm)
                        }
                    }
                }
            };

            self.inner
                .scheduler
                .record(committed.id, committed.revision, &committed.state)
                .await;
        }

        self.publish_list();
        if let Err(e) = self.inner.scheduler.settle(true).await {
            warn!(reason, error = %e, "Wake not armed after refresh, will retry");
        }
    }

    fn cell(&self, id: AlarmId) -> Result<Arc<Mutex<Alarm>>> {
        self.inner
            .registry
            .lock()
            .cell(id)
            .ok_or(Error::NotFound(id))
    }

    fn next_id(&self) -> AlarmId {
        let ulid = self
            .inner
            .ids
            .lock()
            .generate()
            .unwrap_or_else(|_| Ulid::new());
        AlarmId::new(ulid)
    }

    /// Snapshot and send under the registry lock so publishes cannot
    /// overtake each other.
    fn publish_list(&self) {
        let registry = self.inner.registry.lock();
        self.inner.alarms_tx.send_replace(registry.records());
    }

    fn broadcast(&self, committed: &Committed) {
        for effect in &committed.effects {
            debug!(alarm = %committed.id, %effect, "Alarm effect");
            // No receivers is fine.
            let _ = self.inner.notify_tx.send(AlarmNotification {
                id: committed.id,
                effect: *effect,
            });
        }
    }
}

fn silence_effect(state: &AlarmState) -> Vec<Effect> {
    state
        .is_ringing()
        .then_some(Effect::RingingStopped)
        .into_iter()
        .collect()
}
