//! Activity baseline persistence
//!
//! When a system goes idle (> 4h without events) its buckets are evicted
//! from memory and the long-lived hourly average is written here; the
//! record is restored on the system's next touch. Keys are big-endian
//! system ids for cheap range scans.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::SystemId;

use super::StorageError;

/// Persisted long-run activity baseline for one system.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BaselineRecord {
    pub system_id: SystemId,
    /// Exponential hourly kill average.
    pub hourly_ema: f64,
    /// First observation time, used for the 24h trust gate.
    pub observed_since: DateTime<Utc>,
    pub evicted_at: DateTime<Utc>,
}

/// sled-backed baseline store.
#[derive(Clone)]
pub struct BaselineStore {
    tree: sled::Tree,
}

impl BaselineStore {
    pub fn open(db: &sled::Db) -> Result<Self, StorageError> {
        let tree = db.open_tree("activity_baselines")?;
        Ok(Self { tree })
    }

    pub fn put(&self, record: &BaselineRecord) -> Result<(), StorageError> {
        let key = record.system_id.to_be_bytes();
        let value = serde_json::to_vec(record)?;
        self.tree.insert(key, value)?;
        debug!(system_id = record.system_id, ema = record.hourly_ema, "Baseline persisted");
        Ok(())
    }

    pub fn get(&self, system_id: SystemId) -> Result<Option<BaselineRecord>, StorageError> {
        match self.tree.get(system_id.to_be_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Flush pending writes to disk. Called during shutdown step 4.
    pub fn flush(&self) -> Result<(), StorageError> {
        self.tree.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store() -> (tempfile::TempDir, BaselineStore) {
        let tmp = tempfile::tempdir().unwrap();
        let db = sled::open(tmp.path().join("db")).unwrap();
        let store = BaselineStore::open(&db).unwrap();
        (tmp, store)
    }

    #[test]
    fn put_get_round_trip() {
        let (_tmp, store) = open_store();
        let record = BaselineRecord {
            system_id: 30001234,
            hourly_ema: 0.5,
            observed_since: Utc::now(),
            evicted_at: Utc::now(),
        };
        store.put(&record).unwrap();
        assert_eq!(store.get(30001234).unwrap().as_ref(), Some(&record));
    }

    #[test]
    fn missing_system_is_none() {
        let (_tmp, store) = open_store();
        assert!(store.get(42).unwrap().is_none());
    }
}
