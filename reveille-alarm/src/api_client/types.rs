//! API data transfer objects.
//!
//! These types define the API contract shared between the server and
//! clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

fn default_true() -> bool {
    true
}

/// Alarm definition submitted by a client.
///
/// Omitted snooze and pre-alarm durations take the daemon's configured
/// defaults.
#[derive(Clone, Debug, Deserialize, Serialize, ToSchema)]
pub struct AlarmRequest {
    pub hour: u8,
    pub minute: u8,
    /// Weekday names such as `mon` or `saturday`. Empty for a one-shot
    /// alarm.
    #[serde(default)]
    pub days: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub label: String,
    #[serde(default = "default_true")]
    pub vibrate: bool,
    #[serde(default)]
    pub ringtone: Option<String>,
    #[serde(default)]
    pub pre_alarm: bool,
    #[serde(default)]
    pub pre_alarm_minutes: Option<u32>,
    #[serde(default)]
    pub snooze_minutes: Option<u32>,
    /// Minutes of unattended ringing before the alarm silences itself;
    /// zero rings until acted on.
    #[serde(default)]
    pub auto_silence_minutes: Option<u32>,
    #[serde(default)]
    pub delete_after_dismiss: bool,
}

impl AlarmRequest {
    /// An enabled one-shot alarm with every optional field left to the
    /// daemon.
    pub fn new(hour: u8, minute: u8) -> Self {
        Self {
            hour,
            minute,
            days: Vec::new(),
            enabled: true,
            label: String::new(),
            vibrate: true,
            ringtone: None,
            pre_alarm: false,
            pre_alarm_minutes: None,
            snooze_minutes: None,
            auto_silence_minutes: None,
            delete_after_dismiss: false,
        }
    }
}

/// An alarm with its current lifecycle state.
#[derive(Clone, Debug, Deserialize, Serialize, ToSchema)]
pub struct AlarmView {
    pub id: String,
    pub enabled: bool,
    pub hour: u8,
    pub minute: u8,
    pub days: Vec<String>,
    pub label: String,
    pub vibrate: bool,
    pub ringtone: Option<String>,
    pub pre_alarm: bool,
    pub pre_alarm_minutes: u32,
    pub snooze_minutes: u32,
    pub auto_silence_minutes: u32,
    pub delete_after_dismiss: bool,
    /// One of `disabled`, `enabled`, `pre_alarm_firing`, `firing`,
    /// `snoozed`.
    pub state: String,
    /// Main time of the occurrence in progress.
    pub trigger: Option<DateTime<Utc>>,
    /// When this alarm next needs the device awake.
    pub next_wake: Option<DateTime<Utc>>,
}

/// The earliest pending wake over all alarms.
#[derive(Clone, Debug, Default, Deserialize, Serialize, ToSchema)]
pub struct NextWakeView {
    pub alarm_id: Option<String>,
    pub at: Option<DateTime<Utc>>,
    /// `at` in the device's timezone, `YYYY-MM-DD HH:MM`.
    pub local_time: Option<String>,
    /// `normal` or `pre_alarm`.
    pub kind: Option<String>,
    /// Set while the wake timer cannot be armed.
    pub fault: Option<String>,
}

/// Partial alarm update.
#[derive(Clone, Debug, Default, Deserialize, Serialize, ToSchema)]
pub struct AlarmPatchRequest {
    pub enabled: Option<bool>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, ToSchema)]
pub struct SnoozeRequest {
    /// Overrides the alarm's snooze duration.
    pub minutes: Option<u32>,
}

/// Error body returned with every non-2xx status.
#[derive(Clone, Debug, Deserialize, Serialize, ToSchema)]
pub struct ErrorView {
    pub error: String,
}
