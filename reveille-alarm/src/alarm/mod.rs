//! Alarm definitions, lifecycle states and the per-alarm state machine.

pub mod machine;
pub mod occurrence;
mod state;
mod value;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

pub use state::{AlarmState, WakeKind};
pub use value::{AlarmValue, Weekdays};

/// Opaque alarm identifier.
///
/// Time-ordered, so sorting by id sorts by creation, and never reused:
/// ids are minted from the creation instant plus randomness rather than
/// from a counter that could restart after the newest alarm is deleted.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlarmId(Ulid);

impl AlarmId {
    pub fn new(ulid: Ulid) -> Self {
        Self(ulid)
    }
}

impl fmt::Display for AlarmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Debug for AlarmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AlarmId({})", self.0)
    }
}

impl FromStr for AlarmId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s).map(Self)
    }
}

/// An alarm as persisted and as published to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmRecord {
    pub id: AlarmId,
    pub value: AlarmValue,
    pub state: AlarmState,
}

/// The live aggregate owned by the manager.
///
/// `revision` increases with every committed transition so the scheduler
/// can discard notifications that arrive out of order.
#[derive(Debug)]
pub struct Alarm {
    pub id: AlarmId,
    pub value: AlarmValue,
    pub state: AlarmState,
    pub revision: u64,
    /// Set when the alarm was deleted while an event was waiting for it.
    pub deleted: bool,
}

impl Alarm {
    pub fn new(record: AlarmRecord) -> Self {
        Self {
            id: record.id,
            value: record.value,
            state: record.state,
            revision: 0,
            deleted: false,
        }
    }

    pub fn record(&self) -> AlarmRecord {
        AlarmRecord {
            id: self.id,
            value: self.value.clone(),
            state: self.state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_round_trips_through_string() {
        let id = AlarmId::new(Ulid::new());
        let parsed: AlarmId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn id_rejects_garbage() {
        assert!("not-an-id".parse::<AlarmId>().is_err());
    }

    #[test]
    fn ids_sort_in_creation_order() {
        let mut generator = ulid::Generator::new();
        let first = AlarmId::new(generator.generate().unwrap());
        let second = AlarmId::new(generator.generate().unwrap());
        assert!(first < second);
    }
}
