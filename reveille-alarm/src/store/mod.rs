//! Durable storage of alarm records.

use async_trait::async_trait;

use crate::alarm::{AlarmId, AlarmRecord};

mod json;
mod memory;

pub use json::JsonFileStore;
pub use memory::MemoryStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed store contents: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Key-value storage of alarms, keyed by id.
///
/// `save` is an upsert. Implementations must make each call atomic: after
/// a failed `save` the previously stored record is still intact.
#[async_trait]
pub trait AlarmStore: Send + Sync {
    /// Every stored record, in id order.
    async fn load_all(&self) -> Result<Vec<AlarmRecord>, StoreError>;

    async fn save(&self, record: &AlarmRecord) -> Result<(), StoreError>;

    /// Remove a record. Deleting an absent id succeeds.
    async fn delete(&self, id: AlarmId) -> Result<(), StoreError>;
}
