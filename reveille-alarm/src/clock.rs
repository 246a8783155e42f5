//! Wall-clock source and local-time conversion.
//!
//! Alarm times are civil times ("07:00 on Mondays") that only become
//! instants once resolved in the device's timezone. The [`Clock`] trait
//! does that resolution using whatever timezone is in effect at the moment
//! of the call; nothing derived from it is cached across a timezone change.

use chrono::{
    DateTime, FixedOffset, Local, LocalResult, NaiveDateTime, Offset, TimeDelta, TimeZone, Utc,
};
use parking_lot::Mutex;

/// Asynchronous notifications about the wall clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockEvent {
    /// The wall clock jumped relative to monotonic time (manual set, NTP
    /// step, resume from suspend).
    TimeChanged,

    /// The device's UTC offset changed (timezone change, DST transition).
    TimezoneChanged,
}

/// Time source used by the alarm engine.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;

    /// Offset of the device's timezone at the current instant.
    fn utc_offset(&self) -> FixedOffset;

    /// Civil time in the device's timezone at `at`.
    fn to_local(&self, at: DateTime<Utc>) -> NaiveDateTime;

    /// Resolve a civil time in the device's timezone.
    ///
    /// Returns `None` only when the civil time cannot be mapped at all.
    /// Ambiguous times resolve to the earlier instant.
    fn from_local(&self, local: NaiveDateTime) -> Option<DateTime<Utc>>;
}

/// The host clock and timezone.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn utc_offset(&self) -> FixedOffset {
        Local::now().offset().fix()
    }

    fn to_local(&self, at: DateTime<Utc>) -> NaiveDateTime {
        at.with_timezone(&Local).naive_local()
    }

    fn from_local(&self, local: NaiveDateTime) -> Option<DateTime<Utc>> {
        match Local.from_local_datetime(&local) {
            LocalResult::Single(t) => Some(t.with_timezone(&Utc)),
            LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
            // Skipped by a DST gap; ring at the first valid instant after it.
            LocalResult::None => Local
                .from_local_datetime(&(local + TimeDelta::hours(1)))
                .earliest()
                .map(|t| t.with_timezone(&Utc)),
        }
    }
}

/// A clock that only moves when told to.
///
/// Uses a fixed UTC offset that can be changed to simulate timezone
/// changes. Intended for simulations and tests.
#[derive(Debug)]
pub struct ManualClock {
    inner: Mutex<ManualClockState>,
}

#[derive(Debug)]
struct ManualClockState {
    now: DateTime<Utc>,
    offset: FixedOffset,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>, offset: FixedOffset) -> Self {
        Self {
            inner: Mutex::new(ManualClockState { now, offset }),
        }
    }

    /// Create a clock showing the given civil time in the given offset.
    pub fn at_local(local: NaiveDateTime, offset: FixedOffset) -> Self {
        let now = (local - offset).and_utc();
        Self::new(now, offset)
    }

    pub fn set(&self, now: DateTime<Utc>) {
        self.inner.lock().now = now;
    }

    /// Jump the wall clock to the given civil time in the current offset.
    pub fn set_local(&self, local: NaiveDateTime) {
        let mut inner = self.inner.lock();
        inner.now = (local - inner.offset).and_utc();
    }

    pub fn advance(&self, by: TimeDelta) {
        self.inner.lock().now += by;
    }

    pub fn set_offset(&self, offset: FixedOffset) {
        self.inner.lock().offset = offset;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.inner.lock().now
    }

    fn utc_offset(&self) -> FixedOffset {
        self.inner.lock().offset
    }

    fn to_local(&self, at: DateTime<Utc>) -> NaiveDateTime {
        at.with_timezone(&self.utc_offset()).naive_local()
    }

    fn from_local(&self, local: NaiveDateTime) -> Option<DateTime<Utc>> {
        self.utc_offset()
            .from_local_datetime(&local)
            .single()
            .map(|t| t.with_timezone(&Utc))
    }
}
