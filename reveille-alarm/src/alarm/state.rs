use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a scheduled wake is for.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WakeKind {
    PreAlarm,
    Normal,
    /// End of the ringing window of an unattended alarm.
    AutoSilence,
}

/// Lifecycle state of one alarm.
///
/// `trigger` is always the main time of the occurrence being handled. The
/// pending wake, if any, is what the scheduler arms; see
/// [`pending_wake`](Self::pending_wake).
///
/// ```text
///  Disabled ⇄ Enabled ─► PreAlarmFiring ─► Firing ⇄ Snoozed
///                │                           │
///                └───────────────────────────┴─► (dismiss, auto-silence)
///                                                 Enabled | Disabled
/// ```
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::IntoStaticStr,
)]
#[serde(tag = "state", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AlarmState {
    Disabled,

    /// Armed for the next occurrence.
    Enabled {
        trigger: DateTime<Utc>,
        pre_alarm: Option<DateTime<Utc>>,
    },

    /// Pre-alarm sounding; the main alarm is still pending.
    PreAlarmFiring { trigger: DateTime<Utc> },

    /// Main alarm ringing, silencing itself at `silence_at` if set.
    Firing {
        trigger: DateTime<Utc>,
        #[serde(default)]
        silence_at: Option<DateTime<Utc>>,
    },

    Snoozed {
        until: DateTime<Utc>,
        trigger: DateTime<Utc>,
    },
}

impl AlarmState {
    /// The wake this state is waiting on. `Disabled` and a `Firing` alarm
    /// without auto-silence are quiescent.
    pub fn pending_wake(&self) -> Option<(DateTime<Utc>, WakeKind)> {
        match *self {
            AlarmState::Enabled {
                pre_alarm: Some(pre_alarm),
                ..
            } => Some((pre_alarm, WakeKind::PreAlarm)),
            AlarmState::Enabled { trigger, .. } | AlarmState::PreAlarmFiring { trigger } => {
                Some((trigger, WakeKind::Normal))
            }
            AlarmState::Snoozed { until, .. } => Some((until, WakeKind::Normal)),
            AlarmState::Firing {
                silence_at: Some(silence_at),
                ..
            } => Some((silence_at, WakeKind::AutoSilence)),
            AlarmState::Firing { .. } | AlarmState::Disabled => None,
        }
    }

    pub fn next_trigger(&self) -> Option<DateTime<Utc>> {
        self.pending_wake().map(|(at, _)| at)
    }

    /// Main time of the occurrence in progress.
    pub fn occurrence(&self) -> Option<DateTime<Utc>> {
        match *self {
            AlarmState::Disabled => None,
            AlarmState::Enabled { trigger, .. }
            | AlarmState::PreAlarmFiring { trigger }
            | AlarmState::Firing { trigger, .. }
            | AlarmState::Snoozed { trigger, .. } => Some(trigger),
        }
    }

    pub fn is_live(&self) -> bool {
        !matches!(self, AlarmState::Disabled)
    }

    /// Whether something is sounding right now.
    pub fn is_ringing(&self) -> bool {
        matches!(
            self,
            AlarmState::PreAlarmFiring { .. } | AlarmState::Firing { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        self.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 4, h, m, 0).unwrap()
    }

    #[test]
    fn enabled_with_pre_alarm_waits_on_pre_alarm() {
        let state = AlarmState::Enabled {
            trigger: at(7, 0),
            pre_alarm: Some(at(6, 50)),
        };
        assert_eq!(state.pending_wake(), Some((at(6, 50), WakeKind::PreAlarm)));
        assert_eq!(state.occurrence(), Some(at(7, 0)));
    }

    #[test]
    fn pre_alarm_firing_waits_on_main() {
        let state = AlarmState::PreAlarmFiring { trigger: at(7, 0) };
        assert_eq!(state.pending_wake(), Some((at(7, 0), WakeKind::Normal)));
        assert!(state.is_ringing());
    }

    #[test]
    fn snoozed_waits_on_until() {
        let state = AlarmState::Snoozed {
            until: at(7, 12),
            trigger: at(7, 0),
        };
        assert_eq!(state.next_trigger(), Some(at(7, 12)));
        assert!(!state.is_ringing());
    }

    #[test]
    fn quiescent_states_have_no_wake() {
        assert_eq!(AlarmState::Disabled.pending_wake(), None);
        let ringing = AlarmState::Firing {
            trigger: at(7, 0),
            silence_at: None,
        };
        assert_eq!(ringing.pending_wake(), None);
        assert!(!AlarmState::Disabled.is_live());
    }

    #[test]
    fn firing_waits_on_auto_silence() {
        let state = AlarmState::Firing {
            trigger: at(7, 0),
            silence_at: Some(at(7, 10)),
        };
        assert_eq!(state.pending_wake(), Some((at(7, 10), WakeKind::AutoSilence)));
        assert_eq!(state.occurrence(), Some(at(7, 0)));
        assert!(state.is_ringing());
    }

    #[test]
    fn names_are_snake_case() {
        assert_eq!(AlarmState::Disabled.name(), "disabled");
        assert_eq!(
            AlarmState::PreAlarmFiring { trigger: at(7, 0) }.to_string(),
            "pre_alarm_firing"
        );
        assert_eq!(WakeKind::PreAlarm.to_string(), "pre_alarm");
    }

    #[test]
    fn serializes_with_state_tag() {
        let state = AlarmState::Firing {
            trigger: at(7, 0),
            silence_at: Some(at(7, 10)),
        };
        let json = serde_json::to_value(state).unwrap();
        assert_eq!(json["state"], "firing");

        let back: AlarmState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn firing_stored_without_silence_instant_loads() {
        let json = serde_json::json!({ "state": "firing", "trigger": at(7, 0) });
        let state: AlarmState = serde_json::from_value(json).unwrap();
        assert_eq!(
            state,
            AlarmState::Firing {
                trigger: at(7, 0),
                silence_at: None,
            }
        );
    }
}
