//! Opaque key-value persistence. Used only for the bounded historical
//! segment ring and a short-lived crash-recovery snapshot; both payloads
//! are small, so reads and writes stay synchronous.

use crate::calibration::SegmentHistory;
use crate::telemetry::TelemetrySample;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::warn;

pub const HISTORY_KEY: &str = "history.segments";
pub const RECOVERY_KEY: &str = "recovery.snapshot";

/// A recovery snapshot older than this is discarded on restore.
pub const RECOVERY_MAX_AGE: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read store: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to encode store value: {0}")]
    Encode(#[from] serde_json::Error),
}

pub trait KeyValueStore: Send {
    fn get(&self, key: &str) -> Option<String>;
    fn put(&mut self, key: &str, value: String) -> Result<(), StoreError>;
    fn remove(&mut self, key: &str) -> Result<(), StoreError>;
}

/// In-memory store for tests and for running without persistence.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: BTreeMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn put(&mut self, key: &str, value: String) -> Result<(), StoreError> {
        self.values.insert(key.to_owned(), value);
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        self.values.remove(key);
        Ok(())
    }
}

/// Single-JSON-file store. The whole map is rewritten on every put, which
/// is fine at these payload sizes.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    values: BTreeMap<String, Value>,
}

impl FileStore {
    /// Opens the store, creating parent directories as needed. A missing
    /// or unreadable file starts empty rather than failing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let values = match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(values) => values,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Store file corrupt, starting empty");
                    BTreeMap::new()
                }
            },
            Err(_) => BTreeMap::new(),
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self { path, values })
    }

    fn flush(&self) -> Result<(), StoreError> {
        let contents = serde_json::to_string_pretty(&self.values)?;
        std::fs::write(&self.path, contents)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).map(Value::to_string)
    }

    fn put(&mut self, key: &str, value: String) -> Result<(), StoreError> {
        let parsed: Value = serde_json::from_str(&value)?;
        self.values.insert(key.to_owned(), parsed);
        self.flush()
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        if self.values.remove(key).is_some() {
            self.flush()?;
        }
        Ok(())
    }
}

/// Minimal state needed to resume after a crash or restart: the last seen
/// sample and the connection picture at the time it was saved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoverySnapshot {
    pub last_sample: TelemetrySample,
    pub connected: bool,
    pub saved_at: SystemTime,
}

pub fn save_recovery(
    store: &mut dyn KeyValueStore,
    snapshot: &RecoverySnapshot,
) -> Result<(), StoreError> {
    store.put(RECOVERY_KEY, serde_json::to_string(snapshot)?)
}

/// Drops the persisted recovery snapshot. A fresh trip must never resume
/// from a sample recorded before the operator discarded it.
pub fn clear_recovery(store: &mut dyn KeyValueStore) -> Result<(), StoreError> {
    store.remove(RECOVERY_KEY)
}

/// Restores the recovery snapshot if one exists and is younger than
/// [`RECOVERY_MAX_AGE`]. Corrupt payloads are dropped with a warning.
pub fn load_recovery(store: &dyn KeyValueStore, now: SystemTime) -> Option<RecoverySnapshot> {
    let raw = store.get(RECOVERY_KEY)?;
    let snapshot: RecoverySnapshot = match serde_json::from_str(&raw) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(error = %e, "Discarding unreadable recovery snapshot");
            return None;
        }
    };
    let age = now.duration_since(snapshot.saved_at).ok()?;
    (age <= RECOVERY_MAX_AGE).then_some(snapshot)
}

pub fn save_history(
    store: &mut dyn KeyValueStore,
    history: &SegmentHistory,
) -> Result<(), StoreError> {
    store.put(HISTORY_KEY, serde_json::to_string(history)?)
}

pub fn load_history(store: &dyn KeyValueStore) -> SegmentHistory {
    let Some(raw) = store.get(HISTORY_KEY) else {
        return SegmentHistory::new();
    };
    match serde_json::from_str(&raw) {
        Ok(history) => history,
        Err(e) => {
            warn!(error = %e, "Discarding unreadable segment history");
            SegmentHistory::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;

    fn sample() -> TelemetrySample {
        TelemetrySample {
            timestamp: UNIX_EPOCH + Duration::from_secs(1000),
            voltage: 80.0,
            battery_percent: 70.0,
            distance_km: 12.0,
            speed_kmh: 0.0,
            power_w: 0.0,
            current_a: 0.0,
            temperature_c: 18.0,
            connected: true,
            charging: false,
        }
    }

    #[test]
    fn recovery_round_trip_within_age_window() {
        let mut store = MemoryStore::new();
        let saved_at = UNIX_EPOCH + Duration::from_secs(1000);
        let snapshot = RecoverySnapshot {
            last_sample: sample(),
            connected: true,
            saved_at,
        };
        save_recovery(&mut store, &snapshot).expect("save");

        let restored = load_recovery(&store, saved_at + Duration::from_secs(120));
        assert_eq!(restored, Some(snapshot));
    }

    #[test]
    fn stale_recovery_snapshot_is_discarded() {
        let mut store = MemoryStore::new();
        let saved_at = UNIX_EPOCH + Duration::from_secs(1000);
        let snapshot = RecoverySnapshot {
            last_sample: sample(),
            connected: false,
            saved_at,
        };
        save_recovery(&mut store, &snapshot).expect("save");

        let restored = load_recovery(&store, saved_at + Duration::from_secs(301));
        assert!(restored.is_none());
    }

    #[test]
    fn corrupt_recovery_payload_is_dropped() {
        let mut store = MemoryStore::new();
        store.put(RECOVERY_KEY, "{not json".to_owned()).expect("put");
        assert!(load_recovery(&store, UNIX_EPOCH).is_none());
    }

    #[test]
    fn cleared_recovery_snapshot_is_gone() {
        let mut store = MemoryStore::new();
        let saved_at = UNIX_EPOCH + Duration::from_secs(1000);
        let snapshot = RecoverySnapshot {
            last_sample: sample(),
            connected: true,
            saved_at,
        };
        save_recovery(&mut store, &snapshot).expect("save");

        clear_recovery(&mut store).expect("clear");
        assert!(load_recovery(&store, saved_at + Duration::from_secs(10)).is_none());
    }

    #[test]
    fn missing_history_loads_empty() {
        let store = MemoryStore::new();
        assert!(load_history(&store).is_empty());
    }

    #[test]
    fn file_store_round_trips_through_disk() {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time before unix epoch")
            .as_nanos();
        let path = std::env::temp_dir().join(format!("wheelrange-store-{unique}.json"));

        {
            let mut store = FileStore::open(&path).expect("open");
            store
                .put("history.segments", "{\"segments\":[]}".to_owned())
                .expect("put");
        }

        let mut reopened = FileStore::open(&path).expect("reopen");
        assert!(reopened.get("history.segments").is_some());
        assert!(load_history(&reopened).is_empty());

        reopened.remove("history.segments").expect("remove");
        let reopened_again = FileStore::open(&path).expect("reopen after remove");
        assert!(reopened_again.get("history.segments").is_none());

        let _ = std::fs::remove_file(&path);
    }
}
