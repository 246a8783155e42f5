//! Per-alarm lifecycle.
//!
//! Every entry point is a pure function of the alarm's value, its current
//! state, the event and the current time. It returns either a
//! [`Transition`] (the new state plus side effects for the caller to carry
//! out) or a [`Rejection`], in which case the state is left as it was.
//! Every (state, event) pair has one of these two outcomes.
//!
//! | State            | fire                   | snooze  | dismiss              | refresh                |
//! |------------------|------------------------|---------|----------------------|------------------------|
//! | `Disabled`       | stale                  | illegal | illegal              | unchanged              |
//! | `Enabled`        | `PreAlarmFiring`/`Firing` | illegal | next occurrence   | recompute, fire if due |
//! | `PreAlarmFiring` | `Firing`               | `Snoozed` | next occurrence    | fire if due            |
//! | `Firing`         | next occurrence¹       | `Snoozed` | next occurrence    | fire if due            |
//! | `Snoozed`        | `Firing`               | illegal | next occurrence      | fire if due            |
//!
//! "Next occurrence" is `Enabled` for repeating alarms and `Disabled` for
//! one-shot alarms.
//!
//! ¹ Once the auto-silence instant is reached; stale when auto-silence is
//! off.

use chrono::{DateTime, TimeDelta, Utc};

use super::occurrence::{self, Bound, Occurrence};
use super::{AlarmState, AlarmValue};
use crate::clock::Clock;
use crate::tracing::prelude::*;

/// Side effects requested by a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Effect {
    /// Start the quiet pre-alarm notification.
    PreAlarmStarted,
    /// Start ringing the main alarm.
    RingingStarted,
    /// Silence whatever was sounding.
    RingingStopped,
    Snoozed { until: DateTime<Utc> },
    Dismissed,
    /// Nobody reacted; the occurrence ended on its own.
    AutoSilenced,
    /// Remove the alarm entirely.
    Delete,
}

/// Why an event left the state unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    /// The alarm is no longer waiting for this event, typically a wake that
    /// raced with a cancellation.
    #[error("not expected in state {state}")]
    Stale { state: &'static str },

    /// A wake arrived before the instant it was armed for.
    #[error("wake arrived before {due}")]
    Early { due: DateTime<Utc> },

    #[error("not allowed in state {state}")]
    Illegal { state: &'static str },
}

/// Result of an accepted event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub state: AlarmState,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn to(state: AlarmState) -> Self {
        Self {
            state,
            effects: Vec::new(),
        }
    }

    fn with(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    fn after(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        let mut all: Vec<Effect> = effects.into_iter().collect();
        all.append(&mut self.effects);
        self.effects = all;
        self
    }

    /// Whether the alarm should be removed.
    pub fn deletes(&self) -> bool {
        self.effects.contains(&Effect::Delete)
    }
}

/// Arm the alarm for its first occurrence at or after `now`.
///
/// A pre-alarm instant that has already passed is dropped; the alarm waits
/// for its main time. Missed pre-alarm wakes are recovered by [`refresh`],
/// not here.
pub fn enable(value: &AlarmValue, now: DateTime<Utc>, clock: &dyn Clock) -> Transition {
    if !value.enabled {
        return Transition::to(AlarmState::Disabled);
    }

    let Some(Occurrence { trigger, pre_alarm }) =
        occurrence::next(value, now, Bound::AtOrAfter, clock)
    else {
        warn!(
            hour = value.hour,
            minute = value.minute,
            days = ?value.days,
            "No occurrence within a week; treating alarm as disabled"
        );
        return Transition::to(AlarmState::Disabled);
    };

    Transition::to(AlarmState::Enabled {
        trigger,
        pre_alarm: pre_alarm.filter(|pre_alarm| *pre_alarm > now),
    })
}

/// Apply an edited value (or enabled flag) to the alarm.
///
/// Anything sounding is silenced and the lifecycle restarts from the new
/// value.
pub fn reconfigure(
    value: &AlarmValue,
    state: &AlarmState,
    now: DateTime<Utc>,
    clock: &dyn Clock,
) -> Transition {
    enable(value, now, clock).after(silence(state))
}

/// The wake timer for this alarm elapsed.
///
/// A ringing alarm whose auto-silence instant has passed is finished like
/// a dismissal, announced as [`Effect::AutoSilenced`].
pub fn fire(
    value: &AlarmValue,
    state: &AlarmState,
    now: DateTime<Utc>,
    clock: &dyn Clock,
) -> Result<Transition, Rejection> {
    match *state {
        AlarmState::Enabled { trigger, .. } if now >= trigger => {
            // Delivered late enough that the pre-alarm window is gone.
            Ok(ring(value, trigger, now))
        }
        AlarmState::Enabled {
            trigger,
            pre_alarm: Some(pre_alarm),
        } if now >= pre_alarm => Ok(
            Transition::to(AlarmState::PreAlarmFiring { trigger }).with(Effect::PreAlarmStarted)
        ),
        AlarmState::PreAlarmFiring { trigger } if now >= trigger => Ok(ring(value, trigger, now)),
        AlarmState::Snoozed { until, trigger } if now >= until => Ok(ring(value, trigger, now)),
        AlarmState::Firing {
            silence_at: Some(silence_at),
            ..
        } if now >= silence_at => {
            debug!(state = %state, %silence_at, "Ringing unattended; silencing");
            finish(value, state, now, clock, Effect::AutoSilenced)
        }
        AlarmState::Enabled { .. }
        | AlarmState::PreAlarmFiring { .. }
        | AlarmState::Snoozed { .. }
        | AlarmState::Firing {
            silence_at: Some(_),
            ..
        } => Err(Rejection::Early {
            due: state.next_trigger().unwrap_or(now),
        }),
        AlarmState::Firing { .. } | AlarmState::Disabled => Err(Rejection::Stale {
            state: state.name(),
        }),
    }
}

/// Start ringing now. The ringing window is pinned to an absolute instant.
fn ring(value: &AlarmValue, trigger: DateTime<Utc>, now: DateTime<Utc>) -> Transition {
    let silence_at = value.auto_silence_after().map(|after| now + after);
    Transition::to(AlarmState::Firing {
        trigger,
        silence_at,
    })
    .with(Effect::RingingStarted)
}

/// Silence the alarm until `now + delta`, defaulting to the configured
/// snooze duration.
pub fn snooze(
    value: &AlarmValue,
    state: &AlarmState,
    now: DateTime<Utc>,
    delta: Option<TimeDelta>,
) -> Result<Transition, Rejection> {
    match *state {
        AlarmState::PreAlarmFiring { trigger } | AlarmState::Firing { trigger, .. } => {
            let until = now + delta.unwrap_or_else(|| value.snooze_duration());
            Ok(Transition::to(AlarmState::Snoozed { until, trigger })
                .with(Effect::RingingStopped)
                .with(Effect::Snoozed { until }))
        }
        _ => Err(Rejection::Illegal {
            state: state.name(),
        }),
    }
}

/// Finish the occurrence in progress.
///
/// Repeating alarms move on to the first occurrence strictly after both
/// `now` and the current occurrence's main time. Dismissing during the
/// pre-alarm therefore cancels the pending main alarm too, and dismissing
/// an armed alarm skips its upcoming occurrence. One-shot alarms are
/// disabled, or deleted when so configured.
pub fn dismiss(
    value: &AlarmValue,
    state: &AlarmState,
    now: DateTime<Utc>,
    clock: &dyn Clock,
) -> Result<Transition, Rejection> {
    finish(value, state, now, clock, Effect::Dismissed)
}

/// End the occurrence in progress, announcing it with `ended`.
fn finish(
    value: &AlarmValue,
    state: &AlarmState,
    now: DateTime<Utc>,
    clock: &dyn Clock,
    ended: Effect,
) -> Result<Transition, Rejection> {
    let Some(current) = state.occurrence() else {
        return Err(Rejection::Illegal {
            state: state.name(),
        });
    };
    let stopped = silence(state);

    if !value.is_repeating() {
        let transition = Transition::to(AlarmState::Disabled).with(ended);
        let transition = if value.delete_after_dismiss {
            transition.with(Effect::Delete)
        } else {
            transition
        };
        return Ok(transition.after(stopped));
    }

    let reference = now.max(current);
    let next = match occurrence::next(value, reference, Bound::After, clock) {
        Some(Occurrence { trigger, pre_alarm }) => AlarmState::Enabled {
            trigger,
            pre_alarm: pre_alarm.filter(|pre_alarm| *pre_alarm > now),
        },
        None => {
            warn!(days = ?value.days, "No next occurrence after dismiss; disabling");
            AlarmState::Disabled
        }
    };
    Ok(Transition::to(next).with(ended).after(stopped))
}

/// Re-derive the state after the clock or timezone changed, or after boot.
///
/// Idempotent: with no intervening event a second call yields the same
/// state. A pending wake that already elapsed is treated as missed and
/// fires now.
pub fn refresh(
    value: &AlarmValue,
    state: &AlarmState,
    now: DateTime<Utc>,
    clock: &dyn Clock,
) -> Transition {
    if !value.enabled {
        return Transition::to(AlarmState::Disabled).after(silence(state));
    }

    if let Some(due) = state.next_trigger() {
        if due <= now {
            debug!(state = %state, due = %due, "Pending wake elapsed; firing");
            if let Ok(transition) = fire(value, state, now, clock) {
                return transition;
            }
        }
    }

    match *state {
        AlarmState::Enabled { trigger, .. } => {
            // Same civil time may map to a different instant now.
            let recomputed = enable(value, now, clock);
            if recomputed.state.occurrence() == Some(trigger) {
                Transition::to(*state)
            } else {
                recomputed
            }
        }
        // In-progress occurrences are pinned to absolute instants.
        _ => Transition::to(*state),
    }
}

fn silence(state: &AlarmState) -> Option<Effect> {
    state.is_ringing().then_some(Effect::RingingStopped)
}
