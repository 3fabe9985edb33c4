//! Durable record sets
//!
//! Everything the room persists is loaded whole at startup and rewritten whole
//! after a mutation. Each record set lives in its own JSON document.

use crate::errors::StorageError;
use crate::inventory::{OwnedItem, PendingAppraisal};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

/// One independently persisted record set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordSet {
    Balances,
    Inventories,
    Equipped,
    PendingAppraisals,
}

impl RecordSet {
    pub const ALL: [RecordSet; 4] = [
        RecordSet::Balances,
        RecordSet::Inventories,
        RecordSet::Equipped,
        RecordSet::PendingAppraisals,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            RecordSet::Balances => "balances.json",
            RecordSet::Inventories => "inventories.json",
            RecordSet::Equipped => "equipped.json",
            RecordSet::PendingAppraisals => "pending_appraisals.json",
        }
    }
}

/// Full in-memory image of the persisted state, keyed by display username
/// (and appraisal id for pending appraisals)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub balances: BTreeMap<String, u64>,
    pub inventories: BTreeMap<String, Vec<OwnedItem>>,
    pub equipped: BTreeMap<String, String>,
    pub pending_appraisals: BTreeMap<String, PendingAppraisal>,
}

/// Synchronous load/save backend
pub trait Store: Send {
    fn load(&self) -> Result<Snapshot, StorageError>;

    /// Rewrite one record set from `snapshot`
    fn save(&self, set: RecordSet, snapshot: &Snapshot) -> Result<(), StorageError>;
}

/// One pretty-printed JSON file per record set
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// Open (creating if needed) a data directory
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| {
            StorageError::WriteFailed(format!("Failed to create {}: {}", dir.display(), e))
        })?;
        info!("💾 Data directory: {}", dir.display());
        Ok(Self { dir })
    }

    pub fn path_of(&self, set: RecordSet) -> PathBuf {
        self.dir.join(set.file_name())
    }

    fn read<T: DeserializeOwned + Default>(&self, set: RecordSet) -> Result<T, StorageError> {
        let path = self.path_of(set);
        if !path.exists() {
            return Ok(T::default());
        }
        let raw = fs::read_to_string(&path)
            .map_err(|e| StorageError::ReadFailed(format!("{}: {}", path.display(), e)))?;
        if raw.trim().is_empty() {
            return Ok(T::default());
        }
        serde_json::from_str(&raw)
            .map_err(|e| StorageError::CorruptedData(format!("{}: {}", path.display(), e)))
    }

    fn write<T: Serialize>(&self, set: RecordSet, value: &T) -> Result<(), StorageError> {
        let path = self.path_of(set);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_string_pretty(value)?;
        fs::write(&tmp, body)
            .map_err(|e| StorageError::WriteFailed(format!("{}: {}", tmp.display(), e)))?;
        fs::rename(&tmp, &path)
            .map_err(|e| StorageError::WriteFailed(format!("{}: {}", path.display(), e)))?;
        debug!(file = set.file_name(), "record set written");
        Ok(())
    }
}

impl Store for JsonFileStore {
    fn load(&self) -> Result<Snapshot, StorageError> {
        let snapshot = Snapshot {
            balances: self.read(RecordSet::Balances)?,
            inventories: self.read(RecordSet::Inventories)?,
            equipped: self.read(RecordSet::Equipped)?,
            pending_appraisals: self.read(RecordSet::PendingAppraisals)?,
        };
        info!(
            balances = snapshot.balances.len(),
            inventories = snapshot.inventories.len(),
            pending_appraisals = snapshot.pending_appraisals.len(),
            "📂 Loaded persisted state"
        );
        Ok(snapshot)
    }

    fn save(&self, set: RecordSet, snapshot: &Snapshot) -> Result<(), StorageError> {
        match set {
            RecordSet::Balances => self.write(set, &snapshot.balances),
            RecordSet::Inventories => self.write(set, &snapshot.inventories),
            RecordSet::Equipped => self.write(set, &snapshot.equipped),
            RecordSet::PendingAppraisals => self.write(set, &snapshot.pending_appraisals),
        }
    }
}

/// Volatile store, optionally seeded, that can be told to fail writes
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    snapshot: Snapshot,
    saves: usize,
    fail_writes: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(snapshot: Snapshot) -> Self {
        Self {
            inner: Mutex::new(MemoryInner {
                snapshot,
                ..MemoryInner::default()
            }),
        }
    }

    pub fn fail_writes(&self, fail: bool) {
        self.with(|inner| inner.fail_writes = fail);
    }

    /// What has been saved so far
    pub fn contents(&self) -> Snapshot {
        self.with(|inner| inner.snapshot.clone())
    }

    pub fn save_count(&self) -> usize {
        self.with(|inner| inner.saves)
    }

    fn with<R>(&self, f: impl FnOnce(&mut MemoryInner) -> R) -> R {
        match self.inner.lock() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

impl Store for MemoryStore {
    fn load(&self) -> Result<Snapshot, StorageError> {
        Ok(self.contents())
    }

    fn save(&self, set: RecordSet, snapshot: &Snapshot) -> Result<(), StorageError> {
        self.with(|inner| {
            if inner.fail_writes {
                return Err(StorageError::WriteFailed("memory store is read-only".into()));
            }
            inner.saves += 1;
            match set {
                RecordSet::Balances => inner.snapshot.balances = snapshot.balances.clone(),
                RecordSet::Inventories => inner.snapshot.inventories = snapshot.inventories.clone(),
                RecordSet::Equipped => inner.snapshot.equipped = snapshot.equipped.clone(),
                RecordSet::PendingAppraisals => {
                    inner.snapshot.pending_appraisals = snapshot.pending_appraisals.clone()
                }
            }
            Ok(())
        })
    }
}

/// Shared handle so tests can inspect a store the room owns
impl<S: Store + Sync + ?Sized> Store for std::sync::Arc<S> {
    fn load(&self) -> Result<Snapshot, StorageError> {
        (**self).load()
    }

    fn save(&self, set: RecordSet, snapshot: &Snapshot) -> Result<(), StorageError> {
        (**self).save(set, snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::Appraisal;
    use tempfile::TempDir;

    fn sample() -> Snapshot {
        let mut snapshot = Snapshot::default();
        snapshot.balances.insert("Alice".to_string(), 42);
        snapshot.inventories.insert(
            "Alice".to_string(),
            vec![
                OwnedItem::new("collectible_rock"),
                OwnedItem {
                    item_id: "title_noob".to_string(),
                    appraisal: Some(Appraisal {
                        value: 9,
                        reason: "Mint condition".to_string(),
                    }),
                },
            ],
        );
        snapshot
            .equipped
            .insert("Alice".to_string(), "title_noob".to_string());
        snapshot
    }

    #[test]
    fn test_file_store_round_trip() -> Result<(), StorageError> {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path())?;
        let snapshot = sample();
        for set in RecordSet::ALL {
            store.save(set, &snapshot)?;
        }

        let reopened = JsonFileStore::open(dir.path())?;
        assert_eq!(reopened.load()?, snapshot);
        assert!(!dir.path().join("balances.json.tmp").exists());
        Ok(())
    }

    #[test]
    fn test_missing_files_load_empty() -> Result<(), StorageError> {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path().join("nested"))?;
        assert_eq!(store.load()?, Snapshot::default());
        Ok(())
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("balances.json"), "{not json").unwrap();
        let store = JsonFileStore::open(dir.path()).unwrap();
        assert!(matches!(store.load(), Err(StorageError::CorruptedData(_))));
    }

    #[test]
    fn test_save_rewrites_only_the_named_set() -> Result<(), StorageError> {
        let store = MemoryStore::new();
        store.save(RecordSet::Balances, &sample())?;
        let saved = store.contents();
        assert_eq!(saved.balances.get("Alice"), Some(&42));
        assert!(saved.inventories.is_empty());

        store.fail_writes(true);
        assert!(store.save(RecordSet::Inventories, &sample()).is_err());
        assert_eq!(store.save_count(), 1);
        Ok(())
    }
}
