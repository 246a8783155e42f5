use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{AlarmStore, StoreError};
use crate::alarm::{AlarmId, AlarmRecord};
use crate::tracing::prelude::*;

const FILE_NAME: &str = "alarms.json";
const TEMP_FILE_NAME: &str = "alarms.json.tmp";

/// Stores all alarms as one JSON array in `<dir>/alarms.json`.
///
/// Every change rewrites the whole file through a temporary file and a
/// rename, so a crash mid-write leaves the previous contents in place.
/// The temporary file is synced before the rename and the directory after
/// it, so a saved change also survives power loss.
#[derive(Debug)]
pub struct JsonFileStore {
    dir: PathBuf,
    path: PathBuf,
    temp_path: PathBuf,
    records: Mutex<BTreeMap<AlarmId, AlarmRecord>>,
}

impl JsonFileStore {
    /// Open the store in `dir`, creating the directory if needed.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref();
        tokio::fs::create_dir_all(dir).await?;

        let path = dir.join(FILE_NAME);
        let records = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<Vec<AlarmRecord>>(&bytes)?,
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), count = records.len(), "Opened alarm store");

        Ok(Self {
            dir: dir.to_path_buf(),
            path,
            temp_path: dir.join(TEMP_FILE_NAME),
            records: Mutex::new(records.into_iter().map(|r| (r.id, r)).collect()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write(&self, records: &BTreeMap<AlarmId, AlarmRecord>) -> Result<(), StoreError> {
        let list: Vec<&AlarmRecord> = records.values().collect();
        let bytes = serde_json::to_vec_pretty(&list)?;
        let mut file = tokio::fs::File::create(&self.temp_path).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&self.temp_path, &self.path).await?;
        self.sync_dir().await;
        trace!(path = %self.path.display(), count = list.len(), "Alarm store written");
        Ok(())
    }

    /// Make the rename itself durable. Not every platform can open a
    /// directory for syncing, so failure here is only logged.
    async fn sync_dir(&self) {
        let synced = match tokio::fs::File::open(&self.dir).await {
            Ok(dir) => dir.sync_all().await,
            Err(e) => Err(e),
        };
        if let Err(e) = synced {
            trace!(dir = %self.dir.display(), error = %e, "Could not sync store directory");
        }
    }
}

#[async_trait]
impl AlarmStore for JsonFileStore {
    async fn load_all(&self) -> Result<Vec<AlarmRecord>, StoreError> {
        Ok(self.records.lock().await.values().cloned().collect())
    }

    async fn save(&self, record: &AlarmRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        let mut next = records.clone();
        next.insert(record.id, record.clone());
        self.write(&next).await?;
        *records = next;
        Ok(())
    }

    async fn delete(&self, id: AlarmId) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        if !records.contains_key(&id) {
            return Ok(());
        }
        let mut next = records.clone();
        next.remove(&id);
        self.write(&next).await?;
        *records = next;
        Ok(())
    }
}
