use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{AlarmStore, StoreError};
use crate::alarm::{AlarmId, AlarmRecord};

/// Volatile store, for tests and for running without a data directory.
///
/// Failures can be injected to exercise the persist-before-commit path.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<AlarmId, AlarmRecord>>,
    failing: Mutex<bool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with the given records already stored.
    pub fn with_records(records: impl IntoIterator<Item = AlarmRecord>) -> Self {
        let store = Self::new();
        store
            .records
            .lock()
            .extend(records.into_iter().map(|record| (record.id, record)));
        store
    }

    /// Make every subsequent call fail until switched back.
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }

    pub fn get(&self, id: AlarmId) -> Option<AlarmRecord> {
        self.records.lock().get(&id).cloned()
    }

    fn check(&self) -> Result<(), StoreError> {
        if *self.failing.lock() {
            Err(StoreError::Unavailable("injected failure".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl AlarmStore for MemoryStore {
    async fn load_all(&self) -> Result<Vec<AlarmRecord>, StoreError> {
        self.check()?;
        Ok(self.records.lock().values().cloned().collect())
    }

    async fn save(&self, record: &AlarmRecord) -> Result<(), StoreError> {
        self.check()?;
        self.records.lock().insert(record.id, record.clone());
        Ok(())
    }

    async fn delete(&self, id: AlarmId) -> Result<(), StoreError> {
        self.check()?;
        self.records.lock().remove(&id);
        Ok(())
    }
}
