use std::fmt;

use bitflags::bitflags;
use chrono::{NaiveTime, TimeDelta, Weekday};
use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const MINUTES_PER_DAY: u32 = 24 * 60;

bitflags! {
    /// Days of the week an alarm repeats on. Empty means one-shot.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Weekdays: u8 {
        const MONDAY = 1 << 0;
        const TUESDAY = 1 << 1;
        const WEDNESDAY = 1 << 2;
        const THURSDAY = 1 << 3;
        const FRIDAY = 1 << 4;
        const SATURDAY = 1 << 5;
        const SUNDAY = 1 << 6;

        const WEEKDAYS = Self::MONDAY.bits()
            | Self::TUESDAY.bits()
            | Self::WEDNESDAY.bits()
            | Self::THURSDAY.bits()
            | Self::FRIDAY.bits();
        const WEEKEND = Self::SATURDAY.bits() | Self::SUNDAY.bits();
    }
}

impl Weekdays {
    pub fn day(day: Weekday) -> Self {
        Self::from_bits_truncate(1 << day.num_days_from_monday())
    }

    pub fn contains_day(&self, day: Weekday) -> bool {
        self.contains(Self::day(day))
    }

    /// Selected days, Monday first.
    pub fn days(&self) -> impl Iterator<Item = Weekday> + '_ {
        (0..7u8)
            .filter_map(|n| Weekday::try_from(n).ok())
            .filter(|day| self.contains_day(*day))
    }

    /// Parse day names such as `mon`, `Tuesday` or `SAT`.
    pub fn parse_names<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        names.iter().try_fold(Self::empty(), |days, name| {
            let name = name.as_ref();
            name.trim()
                .parse::<Weekday>()
                .map(|day| days | Self::day(day))
                .map_err(|_| Error::InvalidValue(format!("unknown weekday {name:?}")))
        })
    }

    /// Lowercase three-letter names of the selected days.
    pub fn names(&self) -> Vec<String> {
        self.days()
            .map(|day| day.to_string().to_lowercase())
            .collect()
    }

    /// Shortest gap between two consecutive occurrences, in days.
    ///
    /// One-shot alarms count as daily: their pre-alarm must still fit
    /// within a day.
    pub fn shortest_gap_days(&self) -> u32 {
        let days: Vec<u32> = self.days().map(|d| d.num_days_from_monday()).collect();
        match days.as_slice() {
            [] => 1,
            [_] => 7,
            [first, .., last] => {
                let wrap = first + 7 - last;
                days.windows(2)
                    .map(|pair| pair[1] - pair[0])
                    .fold(wrap, u32::min)
            }
        }
    }
}

impl Serialize for Weekdays {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.names())
    }
}

impl<'de> Deserialize<'de> for Weekdays {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct DaysVisitor;

        impl<'de> Visitor<'de> for DaysVisitor {
            type Value = Weekdays;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a list of weekday names")
            }

            fn visit_seq<A: SeqAccess<'de>>(
                self,
                mut seq: A,
            ) -> std::result::Result<Weekdays, A::Error> {
                let mut days = Weekdays::empty();
                while let Some(name) = seq.next_element::<String>()? {
                    let day = name
                        .parse::<Weekday>()
                        .map_err(|_| de::Error::custom(format!("unknown weekday {name:?}")))?;
                    days |= Weekdays::day(day);
                }
                Ok(days)
            }
        }

        deserializer.deserialize_seq(DaysVisitor)
    }
}

/// User-facing definition of an alarm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmValue {
    pub enabled: bool,
    pub hour: u8,
    pub minute: u8,
    pub days: Weekdays,
    pub label: String,
    pub vibrate: bool,
    /// Ringtone reference understood by the sound player; `None` uses the
    /// player's default.
    pub ringtone: Option<String>,
    pub pre_alarm: bool,
    pub pre_alarm_minutes: u32,
    pub snooze_minutes: u32,
    /// Ringing stops by itself after this many minutes, as if dismissed.
    /// Zero rings until the user acts.
    #[serde(default = "default_auto_silence_minutes")]
    pub auto_silence_minutes: u32,
    /// One-shot alarms only: delete the alarm once dismissed.
    pub delete_after_dismiss: bool,
}

fn default_auto_silence_minutes() -> u32 {
    AlarmValue::DEFAULT_AUTO_SILENCE_MINUTES
}

impl AlarmValue {
    pub const DEFAULT_SNOOZE_MINUTES: u32 = 10;
    pub const DEFAULT_PRE_ALARM_MINUTES: u32 = 30;
    pub const DEFAULT_AUTO_SILENCE_MINUTES: u32 = 10;

    /// An enabled one-shot alarm at `hour:minute` with default settings.
    pub fn new(hour: u8, minute: u8) -> Self {
        Self {
            enabled: true,
            hour,
            minute,
            days: Weekdays::empty(),
            label: String::new(),
            vibrate: true,
            ringtone: None,
            pre_alarm: false,
            pre_alarm_minutes: Self::DEFAULT_PRE_ALARM_MINUTES,
            snooze_minutes: Self::DEFAULT_SNOOZE_MINUTES,
            auto_silence_minutes: Self::DEFAULT_AUTO_SILENCE_MINUTES,
            delete_after_dismiss: false,
        }
    }

    pub fn is_repeating(&self) -> bool {
        !self.days.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        if self.hour > 23 {
            return Err(Error::InvalidValue(format!("hour {} out of range", self.hour)));
        }
        if self.minute > 59 {
            return Err(Error::InvalidValue(format!(
                "minute {} out of range",
                self.minute
            )));
        }
        if self.snooze_minutes == 0 {
            return Err(Error::InvalidValue("snooze duration must be positive".into()));
        }
        if self.snooze_minutes > MINUTES_PER_DAY {
            return Err(Error::InvalidValue(format!(
                "snooze duration {} exceeds a day",
                self.snooze_minutes
            )));
        }
        if self.auto_silence_minutes > MINUTES_PER_DAY {
            return Err(Error::InvalidValue(format!(
                "auto-silence after {} min exceeds a day",
                self.auto_silence_minutes
            )));
        }
        let interval = self.days.shortest_gap_days() * MINUTES_PER_DAY;
        if self.pre_alarm_minutes >= interval {
            return Err(Error::InvalidValue(format!(
                "pre-alarm offset {} min must be shorter than the repeat interval ({} min)",
                self.pre_alarm_minutes, interval
            )));
        }
        Ok(())
    }

    /// Configured time of day.
    ///
    /// Out-of-range fields fall back to midnight; values are validated
    /// before they reach the state machine.
    pub fn time_of_day(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour.into(), self.minute.into(), 0).unwrap_or(NaiveTime::MIN)
    }

    /// Lead time of the pre-alarm, if one is configured.
    pub fn pre_alarm_offset(&self) -> Option<TimeDelta> {
        (self.pre_alarm && self.pre_alarm_minutes > 0)
            .then(|| TimeDelta::minutes(self.pre_alarm_minutes.into()))
    }

    pub fn snooze_duration(&self) -> TimeDelta {
        TimeDelta::minutes(self.snooze_minutes.into())
    }

    /// How long the main alarm rings before silencing itself.
    pub fn auto_silence_after(&self) -> Option<TimeDelta> {
        (self.auto_silence_minutes > 0)
            .then(|| TimeDelta::minutes(self.auto_silence_minutes.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(Weekdays::empty(), 1; "one_shot")]
    #[test_case(Weekdays::MONDAY, 7; "weekly")]
    #[test_case(Weekdays::MONDAY | Weekdays::WEDNESDAY, 2; "mon_wed")]
    #[test_case(Weekdays::MONDAY | Weekdays::SUNDAY, 1; "wraps_around_week")]
    #[test_case(Weekdays::WEEKDAYS, 1; "workdays")]
    #[test_case(Weekdays::TUESDAY | Weekdays::FRIDAY, 3; "tue_fri")]
    fn shortest_gap(days: Weekdays, expected: u32) {
        assert_eq!(days.shortest_gap_days(), expected);
    }

    #[test]
    fn parses_day_names() {
        let days = Weekdays::parse_names(&["mon", "Wednesday", "SUN"]).unwrap();
        assert_eq!(
            days,
            Weekdays::MONDAY | Weekdays::WEDNESDAY | Weekdays::SUNDAY
        );
        assert_eq!(days.names(), vec!["mon", "wed", "sun"]);
    }

    #[test]
    fn rejects_unknown_day_name() {
        assert!(matches!(
            Weekdays::parse_names(&["funday"]),
            Err(Error::InvalidValue(_))
        ));
    }

    #[test]
    fn days_serialize_as_names() {
        let json = serde_json::to_string(&(Weekdays::TUESDAY | Weekdays::SATURDAY)).unwrap();
        assert_eq!(json, r#"["tue","sat"]"#);

        let back: Weekdays = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Weekdays::TUESDAY | Weekdays::SATURDAY);
    }

    #[test]
    fn default_value_is_valid() {
        AlarmValue::new(7, 0).validate().unwrap();
    }

    #[test_case(24, 0; "hour")]
    #[test_case(7, 60; "minute")]
    fn rejects_out_of_range_time(hour: u8, minute: u8) {
        assert!(matches!(
            AlarmValue::new(hour, minute).validate(),
            Err(Error::InvalidValue(_))
        ));
    }

    #[test]
    fn rejects_zero_snooze() {
        let value = AlarmValue {
            snooze_minutes: 0,
            ..AlarmValue::new(7, 0)
        };
        assert!(value.validate().is_err());
    }

    #[test]
    fn pre_alarm_must_fit_in_repeat_interval() {
        let daily_limit = AlarmValue {
            pre_alarm: true,
            pre_alarm_minutes: MINUTES_PER_DAY,
            days: Weekdays::all(),
            ..AlarmValue::new(7, 0)
        };
        assert!(daily_limit.validate().is_err());

        let weekly = AlarmValue {
            days: Weekdays::MONDAY,
            ..daily_limit.clone()
        };
        weekly.validate().unwrap();
    }

    #[test]
    fn auto_silence_zero_rings_until_acted_on() {
        let mut value = AlarmValue::new(7, 0);
        assert_eq!(value.auto_silence_after(), Some(TimeDelta::minutes(10)));

        value.auto_silence_minutes = 0;
        assert_eq!(value.auto_silence_after(), None);
        value.validate().unwrap();

        value.auto_silence_minutes = MINUTES_PER_DAY + 1;
        assert!(value.validate().is_err());
    }

    #[test]
    fn stored_value_without_auto_silence_gets_default() {
        let mut json = serde_json::to_value(AlarmValue::new(7, 0)).unwrap();
        json.as_object_mut().unwrap().remove("auto_silence_minutes");

        let value: AlarmValue = serde_json::from_value(json).unwrap();
        assert_eq!(value.auto_silence_minutes, AlarmValue::DEFAULT_AUTO_SILENCE_MINUTES);
    }

    #[test]
    fn pre_alarm_offset_requires_flag() {
        let mut value = AlarmValue::new(7, 0);
        assert_eq!(value.pre_alarm_offset(), None);

        value.pre_alarm = true;
        value.pre_alarm_minutes = 10;
        assert_eq!(value.pre_alarm_offset(), Some(TimeDelta::minutes(10)));
    }
}
