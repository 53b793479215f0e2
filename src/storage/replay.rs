//! Replay capture — raw events with their observed activity context
//!
//! Every ingested event is captured here as a zstd-compressed JSON record
//! together with the activity slice and escalation observed for its
//! system at ingest time, plus the decisions each profile produced. The
//! explain surface re-runs scoring against this captured context so the
//! historical decision reproduces exactly without touching the live
//! activity cache.
//!
//! Keys are `timestamp_millis (be) || kill_id (be)` for chronological
//! range scans; a small secondary tree maps kill_id to the primary key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::activity::ActivitySlice;
use crate::config::defaults::{REPLAY_RETENTION_HOURS, REPLAY_ZSTD_LEVEL};
use crate::types::{Decision, Event, KillId, PatternEscalation};

use super::StorageError;

/// One captured ingestion record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayRecord {
    pub event: Event,
    /// 60-minute activity slice for the event's system, observed after
    /// the event was recorded.
    pub activity: ActivitySlice,
    pub escalation: Option<PatternEscalation>,
    /// Decisions emitted for this event, one per profile that evaluated it.
    #[serde(default)]
    pub decisions: Vec<Decision>,
}

/// sled-backed replay store.
#[derive(Clone)]
pub struct ReplayStore {
    events: sled::Tree,
    by_kill: sled::Tree,
}

impl ReplayStore {
    pub fn open(db: &sled::Db) -> Result<Self, StorageError> {
        Ok(Self {
            events: db.open_tree("replay_events")?,
            by_kill: db.open_tree("replay_by_kill")?,
        })
    }

    fn primary_key(timestamp: DateTime<Utc>, kill_id: KillId) -> [u8; 16] {
        let mut key = [0u8; 16];
        key[..8].copy_from_slice(&timestamp.timestamp_millis().to_be_bytes());
        key[8..].copy_from_slice(&kill_id.to_be_bytes());
        key
    }

    pub fn put(&self, record: &ReplayRecord) -> Result<(), StorageError> {
        let key = Self::primary_key(record.event.timestamp, record.event.kill_id);
        let json = serde_json::to_vec(record)?;
        let compressed = zstd::encode_all(json.as_slice(), REPLAY_ZSTD_LEVEL)
            .map_err(|e| StorageError::Compression(e.to_string()))?;
        self.events.insert(key, compressed)?;
        self.by_kill
            .insert(record.event.kill_id.to_be_bytes(), &key)?;
        debug!(kill_id = record.event.kill_id, "Replay record captured");
        Ok(())
    }

    /// Look up one record by kill id.
    pub fn get(&self, kill_id: KillId) -> Result<Option<ReplayRecord>, StorageError> {
        let Some(key) = self.by_kill.get(kill_id.to_be_bytes())? else {
            return Ok(None);
        };
        match self.events.get(&key)? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Chronological scan of records with `timestamp >= since`.
    pub fn scan_since(&self, since: DateTime<Utc>) -> Result<Vec<ReplayRecord>, StorageError> {
        let start = Self::primary_key(since, 0);
        let mut records = Vec::new();
        for item in self.events.range(start.as_slice()..) {
            let (_, bytes) = item?;
            match Self::decode(&bytes) {
                Ok(record) => records.push(record),
                Err(e) => warn!(error = %e, "Skipping corrupt replay record"),
            }
        }
        Ok(records)
    }

    /// Drop records older than the retention window.
    pub fn prune(&self, now: DateTime<Utc>) -> Result<usize, StorageError> {
        let cutoff = now - chrono::Duration::hours(REPLAY_RETENTION_HOURS);
        let end = Self::primary_key(cutoff, 0);
        let mut removed = 0usize;
        let stale: Vec<_> = self
            .events
            .range(..end.as_slice())
            .filter_map(|item| item.ok())
            .collect();
        for (key, bytes) in stale {
            if let Ok(record) = Self::decode(&bytes) {
                self.by_kill.remove(record.event.kill_id.to_be_bytes())?;
            }
            self.events.remove(key)?;
            removed += 1;
        }
        if removed > 0 {
            debug!(removed, "Pruned stale replay records");
        }
        Ok(removed)
    }

    fn decode(bytes: &[u8]) -> Result<ReplayRecord, StorageError> {
        let json = zstd::decode_all(bytes).map_err(|e| StorageError::Compression(e.to_string()))?;
        Ok(serde_json::from_slice(&json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Victim, ZkbMeta};

    fn record(kill_id: KillId, minutes_ago: i64) -> ReplayRecord {
        ReplayRecord {
            event: Event {
                kill_id,
                timestamp: Utc::now() - chrono::Duration::minutes(minutes_ago),
                system_id: 30001234,
                victim: Victim {
                    corporation_id: 98000001,
                    ship_type_id: 587,
                    ..Victim::default()
                },
                attackers: vec![crate::types::Attacker::default()],
                zkb: ZkbMeta::default(),
            },
            activity: ActivitySlice::default(),
            escalation: None,
            decisions: Vec::new(),
        }
    }

    fn open_store() -> (tempfile::TempDir, ReplayStore) {
        let tmp = tempfile::tempdir().unwrap();
        let db = sled::open(tmp.path().join("db")).unwrap();
        let store = ReplayStore::open(&db).unwrap();
        (tmp, store)
    }

    #[test]
    fn round_trip_by_kill_id() {
        let (_tmp, store) = open_store();
        store.put(&record(100, 5)).unwrap();
        let loaded = store.get(100).unwrap().unwrap();
        assert_eq!(loaded.event.kill_id, 100);
        assert!(store.get(101).unwrap().is_none());
    }

    #[test]
    fn scan_since_is_chronological() {
        let (_tmp, store) = open_store();
        store.put(&record(1, 30)).unwrap();
        store.put(&record(2, 20)).unwrap();
        store.put(&record(3, 10)).unwrap();

        let records = store
            .scan_since(Utc::now() - chrono::Duration::minutes(25))
            .unwrap();
        let ids: Vec<KillId> = records.iter().map(|r| r.event.kill_id).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn prune_removes_stale_records() {
        let (_tmp, store) = open_store();
        store
            .put(&record(1, REPLAY_RETENTION_HOURS * 60 + 60))
            .unwrap();
        store.put(&record(2, 5)).unwrap();

        let removed = store.prune(Utc::now()).unwrap();
        assert_eq!(removed, 1);
        assert!(store.get(1).unwrap().is_none());
        assert!(store.get(2).unwrap().is_some());
    }
}
