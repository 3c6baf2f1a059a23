//! Per-browser voter state and the key/value storage it lives in.
//!
//! Three keys are persisted: `hasVoted` ("true" or absent), `votedCoupleId`
//! and `lastKnownReset`, both stringified integers.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

pub const HAS_VOTED_KEY: &str = "hasVoted";
pub const VOTED_COUPLE_KEY: &str = "votedCoupleId";
pub const LAST_KNOWN_RESET_KEY: &str = "lastKnownReset";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid storage file: {0}")]
    Json(#[from] serde_json::Error),
}

/// String key/value store, the local equivalent of browser storage.
pub trait VoterStorage {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: String) -> Result<(), StorageError>;
    fn remove(&mut self, key: &str) -> Result<(), StorageError>;
}

#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    entries: HashMap<String, String>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VoterStorage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) -> Result<(), StorageError> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        self.entries.remove(key);
        Ok(())
    }
}

/// JSON object on disk, rewritten whole on every change.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl FileStorage {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let entries = match std::fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => {
                return Err(StorageError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    fn flush(&self) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec_pretty(&self.entries)?;
        let tmp = self.path.with_extension(format!("{}.tmp", Uuid::new_v4()));
        std::fs::write(&tmp, bytes)
            .and_then(|()| std::fs::rename(&tmp, &self.path))
            .map_err(|source| {
                let _ = std::fs::remove_file(&tmp);
                StorageError::Io {
                    path: self.path.clone(),
                    source,
                }
            })
    }
}

impl VoterStorage for FileStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) -> Result<(), StorageError> {
        self.entries.insert(key.to_string(), value);
        self.flush()
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        if self.entries.remove(key).is_some() {
            self.flush()?;
        }
        Ok(())
    }
}

/// Whether this browser has voted, for whom, and the last reset it saw.
///
/// `has_voted()` is true exactly when a voted couple id is recorded; the type
/// cannot represent one without the other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VoterState {
    voted_couple_id: Option<i64>,
    last_known_reset: i64,
}

impl VoterState {
    pub fn new(last_known_reset: i64) -> Self {
        Self {
            voted_couple_id: None,
            last_known_reset,
        }
    }

    pub fn has_voted(&self) -> bool {
        self.voted_couple_id.is_some()
    }

    pub fn voted_couple_id(&self) -> Option<i64> {
        self.voted_couple_id
    }

    pub fn last_known_reset(&self) -> i64 {
        self.last_known_reset
    }

    pub fn record_vote(&mut self, couple_id: i64) {
        self.voted_couple_id = Some(couple_id);
    }

    /// Applies a server reset timestamp. Returns true when it is newer than
    /// the last one seen, in which case the vote is cleared.
    pub fn observe_reset(&mut self, last_reset: i64) -> bool {
        if last_reset <= self.last_known_reset {
            return false;
        }
        self.voted_couple_id = None;
        self.last_known_reset = last_reset;
        true
    }

    /// Reads persisted state. `None` means this browser has never stored any.
    ///
    /// A `hasVoted` flag without a readable couple id is treated as not voted.
    pub fn load(storage: &impl VoterStorage) -> Option<Self> {
        let has_voted = storage.get(HAS_VOTED_KEY);
        let voted_id = storage.get(VOTED_COUPLE_KEY);
        let last_reset = storage.get(LAST_KNOWN_RESET_KEY);

        if has_voted.is_none() && voted_id.is_none() && last_reset.is_none() {
            return None;
        }

        let voted_couple_id = match (has_voted.as_deref(), voted_id) {
            (Some("true"), Some(raw)) => match raw.parse() {
                Ok(id) => Some(id),
                Err(_) => {
                    warn!(value = %raw, "Ignoring unreadable {VOTED_COUPLE_KEY}");
                    None
                }
            },
            (Some("true"), None) => {
                warn!("{HAS_VOTED_KEY} set without {VOTED_COUPLE_KEY}; treating as not voted");
                None
            }
            _ => None,
        };

        let last_known_reset = last_reset
            .and_then(|raw| raw.parse().ok())
            .unwrap_or_default();

        Some(Self {
            voted_couple_id,
            last_known_reset,
        })
    }

    pub fn save(&self, storage: &mut impl VoterStorage) -> Result<(), StorageError> {
        match self.voted_couple_id {
            Some(id) => {
                storage.set(HAS_VOTED_KEY, "true".to_string())?;
                storage.set(VOTED_COUPLE_KEY, id.to_string())?;
            }
            None => {
                storage.remove(HAS_VOTED_KEY)?;
                storage.remove(VOTED_COUPLE_KEY)?;
            }
        }
        storage.set(LAST_KNOWN_RESET_KEY, self.last_known_reset.to_string())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_fresh_storage_has_no_state() {
        assert!(VoterState::load(&MemoryStorage::new()).is_none());
    }

    #[test]
    fn test_save_and_load() {
        let mut storage = MemoryStorage::new();
        let mut state = VoterState::new(1000);
        state.record_vote(2);
        state.save(&mut storage).unwrap();

        assert_eq!(storage.get(HAS_VOTED_KEY).as_deref(), Some("true"));
        assert_eq!(storage.get(VOTED_COUPLE_KEY).as_deref(), Some("2"));
        assert_eq!(storage.get(LAST_KNOWN_RESET_KEY).as_deref(), Some("1000"));
        assert_eq!(VoterState::load(&storage), Some(state));
    }

    #[test]
    fn test_clearing_vote_removes_keys() {
        let mut storage = MemoryStorage::new();
        let mut state = VoterState::new(0);
        state.record_vote(5);
        state.save(&mut storage).unwrap();

        assert!(state.observe_reset(2000));
        state.save(&mut storage).unwrap();

        assert!(storage.get(HAS_VOTED_KEY).is_none());
        assert!(storage.get(VOTED_COUPLE_KEY).is_none());
        assert_eq!(storage.get(LAST_KNOWN_RESET_KEY).as_deref(), Some("2000"));
    }

    #[test]
    fn test_observe_reset_only_when_newer() {
        let mut state = VoterState::new(1000);
        state.record_vote(3);

        assert!(!state.observe_reset(1000));
        assert!(!state.observe_reset(500));
        assert_eq!(state.voted_couple_id(), Some(3));

        assert!(state.observe_reset(1001));
        assert!(!state.has_voted());
        assert_eq!(state.last_known_reset(), 1001);
    }

    #[test]
    fn test_flag_without_id_is_not_voted() {
        let mut storage = MemoryStorage::new();
        storage.set(HAS_VOTED_KEY, "true".to_string()).unwrap();

        let state = VoterState::load(&storage).unwrap();
        assert!(!state.has_voted());
        assert_eq!(state.last_known_reset(), 0);
    }

    #[test]
    fn test_file_storage_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("voter.json");

        let mut storage = FileStorage::open(&path).unwrap();
        let mut state = VoterState::new(7);
        state.record_vote(11);
        state.save(&mut storage).unwrap();

        let reopened = FileStorage::open(&path).unwrap();
        assert_eq!(VoterState::load(&reopened), Some(state));
    }

    #[test]
    fn test_failed_flush_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("voter.json");
        let mut storage = FileStorage::open(&path).unwrap();
        std::fs::create_dir(&path).unwrap();

        let err = storage.set(HAS_VOTED_KEY, "true".to_string()).unwrap_err();
        assert!(matches!(err, StorageError::Io { .. }));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
