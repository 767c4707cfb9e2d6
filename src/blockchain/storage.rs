use std::path::Path;

use log::{info, warn};
use sled::{Db, Tree};
use thiserror::Error;

use super::snapshot::{LedgerSnapshot, SnapshotError};

const LATEST_KEY: &str = "latest_snapshot";

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sled::Error),

    #[error("Snapshot error: {0}")]
    SnapshotError(#[from] SnapshotError),

    #[error("Item not found: {0}")]
    NotFound(String),
}

/// Named ledger snapshots kept in a sled database
pub struct SnapshotStore {
    /// The database instance
    db: Db,

    /// Snapshot blobs keyed by name
    snapshots: Tree,

    /// Bookkeeping such as the most recently saved name
    metadata: Tree,
}

impl std::fmt::Debug for SnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotStore").finish()
    }
}

impl SnapshotStore {
    /// Opens (or creates) a store in the given directory
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        Self::from_db(sled::open(path)?)
    }

    /// Opens a store that is deleted when dropped
    pub fn temporary() -> Result<Self, StorageError> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> Result<Self, StorageError> {
        let snapshots = db.open_tree("snapshots")?;
        let metadata = db.open_tree("metadata")?;

        Ok(Self {
            db,
            snapshots,
            metadata,
        })
    }

    /// Saves a snapshot under `name` and marks it as the latest
    pub fn save(&self, name: &str, snapshot: &LedgerSnapshot) -> Result<(), StorageError> {
        let value = snapshot.to_bytes()?;

        self.snapshots.insert(name.as_bytes(), value)?;
        self.metadata.insert(LATEST_KEY, name.as_bytes())?;
        self.db.flush()?;

        info!("Saved snapshot {} ({} blocks)", name, snapshot.chain.len());
        Ok(())
    }

    /// Loads the snapshot saved under `name`
    pub fn load(&self, name: &str) -> Result<LedgerSnapshot, StorageError> {
        match self.snapshots.get(name.as_bytes())? {
            Some(value) => Ok(LedgerSnapshot::from_bytes(&value)?),
            None => Err(StorageError::NotFound(format!("Snapshot {} not found", name))),
        }
    }

    /// Loads the most recently saved snapshot, if any
    pub fn latest(&self) -> Result<Option<LedgerSnapshot>, StorageError> {
        let name = match self.metadata.get(LATEST_KEY)? {
            Some(value) => String::from_utf8_lossy(&value).to_string(),
            None => return Ok(None),
        };

        match self.load(&name) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(StorageError::NotFound(_)) => {
                warn!("Latest snapshot {} is missing from the store", name);
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Names of all stored snapshots, in key order
    pub fn list(&self) -> Result<Vec<String>, StorageError> {
        self.snapshots
            .iter()
            .keys()
            .map(|key| {
                key.map(|key| String::from_utf8_lossy(&key).to_string())
                    .map_err(StorageError::from)
            })
            .collect()
    }

    /// Removes a snapshot; returns whether it existed
    pub fn remove(&self, name: &str) -> Result<bool, StorageError> {
        Ok(self.snapshots.remove(name.as_bytes())?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::config::LedgerConfig;
    use crate::blockchain::Ledger;

    fn snapshot() -> LedgerSnapshot {
        Ledger::new(LedgerConfig::default().with_difficulty(0))
            .unwrap()
            .export_state()
    }

    #[test]
    fn test_save_and_load() {
        let store = SnapshotStore::temporary().unwrap();
        let snapshot = snapshot();

        store.save("first", &snapshot).unwrap();
        let loaded = store.load("first").unwrap();

        assert_eq!(loaded.chain, snapshot.chain);
        assert!(matches!(store.load("missing"), Err(StorageError::NotFound(_))));
    }

    #[test]
    fn test_latest_tracks_last_save() {
        let store = SnapshotStore::temporary().unwrap();
        assert!(store.latest().unwrap().is_none());

        let first = snapshot();
        let second = snapshot();
        store.save("a", &first).unwrap();
        store.save("b", &second).unwrap();

        let latest = store.latest().unwrap().unwrap();
        assert_eq!(latest.chain, second.chain);
        assert_eq!(store.list().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_remove() {
        let store = SnapshotStore::temporary().unwrap();
        store.save("a", &snapshot()).unwrap();

        assert!(store.remove("a").unwrap());
        assert!(!store.remove("a").unwrap());
        assert!(store.latest().unwrap().is_none());
    }
}
