//! Resolution of an alarm's repeat rule into concrete instants.

use chrono::{DateTime, Datelike, Days, Utc};

use super::AlarmValue;
use crate::clock::Clock;

/// Days searched ahead for a matching weekday: today plus a full week, so
/// a weekly alarm whose time already passed today lands a week later.
const SEARCH_DAYS: u64 = 7;

/// Whether an occurrence exactly at the reference instant qualifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    /// First occurrence at or after the reference.
    AtOrAfter,
    /// First occurrence strictly after the reference.
    After,
}

/// One resolved occurrence of an alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occurrence {
    pub trigger: DateTime<Utc>,
    pub pre_alarm: Option<DateTime<Utc>>,
}

/// Find the next main trigger of `value` relative to `reference`.
///
/// Civil dates and times are resolved through `clock` in the timezone in
/// effect right now. Returns `None` when no day within a week matches,
/// which only happens for a malformed repeat rule.
pub fn next_trigger(
    value: &AlarmValue,
    reference: DateTime<Utc>,
    bound: Bound,
    clock: &dyn Clock,
) -> Option<DateTime<Utc>> {
    let today = clock.to_local(reference).date();
    let time = value.time_of_day();

    (0..=SEARCH_DAYS)
        .filter_map(|offset| today.checked_add_days(Days::new(offset)))
        .filter(|date| !value.is_repeating() || value.days.contains_day(date.weekday()))
        .filter_map(|date| clock.from_local(date.and_time(time)))
        .find(|candidate| match bound {
            Bound::AtOrAfter => *candidate >= reference,
            Bound::After => *candidate > reference,
        })
}

/// Resolve the next occurrence together with its pre-alarm instant.
pub fn next(
    value: &AlarmValue,
    reference: DateTime<Utc>,
    bound: Bound,
    clock: &dyn Clock,
) -> Option<Occurrence> {
    next_trigger(value, reference, bound, clock).map(|trigger| Occurrence {
        trigger,
        pre_alarm: value.pre_alarm_offset().map(|offset| trigger - offset),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm::Weekdays;
    use crate::clock::ManualClock;
    use chrono::{FixedOffset, NaiveDate, NaiveDateTime, TimeDelta};
    use test_case::test_case;

    // 2024-01-04 is a Thursday.
    fn local(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn clock_at(day: u32, h: u32, m: u32) -> ManualClock {
        ManualClock::at_local(local(day, h, m), FixedOffset::east_opt(3600).unwrap())
    }

    fn resolve(clock: &ManualClock, value: &AlarmValue, bound: Bound) -> NaiveDateTime {
        let trigger = next_trigger(value, clock.now(), bound, clock).unwrap();
        clock.to_local(trigger)
    }

    #[test]
    fn one_shot_later_today() {
        let clock = clock_at(4, 6, 0);
        let value = AlarmValue::new(7, 0);
        assert_eq!(resolve(&clock, &value, Bound::AtOrAfter), local(4, 7, 0));
    }

    #[test]
    fn one_shot_already_passed_rolls_to_tomorrow() {
        let clock = clock_at(4, 7, 1);
        let value = AlarmValue::new(7, 0);
        assert_eq!(resolve(&clock, &value, Bound::AtOrAfter), local(5, 7, 0));
    }

    #[test]
    fn bound_decides_exact_match() {
        let clock = clock_at(4, 7, 0);
        let value = AlarmValue::new(7, 0);
        assert_eq!(resolve(&clock, &value, Bound::AtOrAfter), local(4, 7, 0));
        assert_eq!(resolve(&clock, &value, Bound::After), local(5, 7, 0));
    }

    #[test]
    fn mon_wed_created_on_thursday_starts_next_monday() {
        let clock = clock_at(4, 9, 0);
        let value = AlarmValue {
            days: Weekdays::MONDAY | Weekdays::WEDNESDAY,
            ..AlarmValue::new(7, 30)
        };
        assert_eq!(resolve(&clock, &value, Bound::AtOrAfter), local(8, 7, 30));
    }

    #[test]
    fn today_in_repeat_set_but_passed_skips_to_next_match() {
        let clock = clock_at(4, 8, 0);
        let value = AlarmValue {
            days: Weekdays::THURSDAY | Weekdays::SATURDAY,
            ..AlarmValue::new(7, 0)
        };
        assert_eq!(resolve(&clock, &value, Bound::AtOrAfter), local(6, 7, 0));
    }

    #[test]
    fn weekly_alarm_passed_today_lands_next_week() {
        let clock = clock_at(4, 8, 0);
        let value = AlarmValue {
            days: Weekdays::THURSDAY,
            ..AlarmValue::new(7, 0)
        };
        assert_eq!(resolve(&clock, &value, Bound::AtOrAfter), local(11, 7, 0));
    }

    #[test_case(Weekdays::SATURDAY, 6; "saturday")]
    #[test_case(Weekdays::SUNDAY, 7; "sunday")]
    #[test_case(Weekdays::WEEKEND, 6; "weekend")]
    #[test_case(Weekdays::FRIDAY | Weekdays::MONDAY, 5; "friday_first")]
    fn repeat_rule_first_match(days: Weekdays, expected_day: u32) {
        let clock = clock_at(4, 12, 0);
        let value = AlarmValue {
            days,
            ..AlarmValue::new(6, 45)
        };
        assert_eq!(
            resolve(&clock, &value, Bound::AtOrAfter),
            local(expected_day, 6, 45)
        );
    }

    #[test]
    fn resolves_in_current_offset() {
        let clock = clock_at(4, 6, 0);
        let value = AlarmValue::new(7, 0);
        let before = next_trigger(&value, clock.now(), Bound::AtOrAfter, &clock).unwrap();

        // Moving one hour east makes the same instant read 07:00 locally.
        clock.set_offset(FixedOffset::east_opt(2 * 3600).unwrap());
        let after = next_trigger(&value, clock.now(), Bound::AtOrAfter, &clock).unwrap();

        assert_eq!(after, before - TimeDelta::hours(1));
    }

    #[test]
    fn pre_alarm_precedes_trigger() {
        let clock = clock_at(4, 6, 0);
        let value = AlarmValue {
            pre_alarm: true,
            pre_alarm_minutes: 10,
            ..AlarmValue::new(7, 0)
        };
        let occurrence = next(&value, clock.now(), Bound::AtOrAfter, &clock).unwrap();
        assert_eq!(clock.to_local(occurrence.trigger), local(4, 7, 0));
        assert_eq!(
            occurrence.pre_alarm.map(|t| clock.to_local(t)),
            Some(local(4, 6, 50))
        );
    }
}
