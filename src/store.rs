//! Record store: one lock-guarded collection per kind, persisted after
//! every mutation.

use crate::collection::Collection;
use crate::error::{Result, StoreError};
use crate::snapshot::SnapshotFile;
use crate::types::{Record, RecordPatch, StoreStats};
use fs2::FileExt;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Kind name for user accounts.
pub const ACCOUNTS: &str = "accounts";

/// Kind name for product listings.
pub const LISTINGS: &str = "listings";

/// Name of the lock file inside the data directory.
const LOCK_FILE: &str = ".lock";

/// Configuration for one record kind.
#[derive(Clone, Debug)]
pub struct KindConfig {
    /// Kind name; also the snapshot file stem.
    pub name: String,

    /// Field whose value must be unique within the kind.
    pub key_field: String,

    /// Server-assigned defaults, filled in on insert when absent.
    pub defaults: Record,
}

impl KindConfig {
    pub fn new(name: impl Into<String>, key_field: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_field: key_field.into(),
            defaults: Record::new(),
        }
    }

    /// Add a server-assigned default.
    pub fn with_default(
        mut self,
        field: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.defaults.set(field, value);
        self
    }

    /// User accounts, unique by `username`, starting with a zero balance.
    pub fn accounts() -> Self {
        Self::new(ACCOUNTS, "username").with_default("balance", 0)
    }

    /// Product listings, unique by `uniquename`.
    pub fn listings() -> Self {
        Self::new(LISTINGS, "uniquename")
    }

    fn snapshot_name(&self) -> String {
        format!("{}.json", self.name)
    }
}

/// Store configuration.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Directory holding one snapshot file per kind.
    pub data_dir: PathBuf,

    /// Kinds managed by the store.
    pub kinds: Vec<KindConfig>,

    /// Whether to create the data directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Restore the pre-mutation collection when a snapshot write fails.
    ///
    /// When false, a failed write leaves the mutation applied in memory and
    /// reports `PersistenceFailed`.
    pub rollback_on_persist_failure: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            kinds: vec![KindConfig::accounts(), KindConfig::listings()],
            create_if_missing: true,
            rollback_on_persist_failure: false,
        }
    }
}

/// State for one kind.
struct KindSlot {
    config: KindConfig,
    snapshot: SnapshotFile,
    collection: RwLock<Collection>,
}

/// The record store.
///
/// Every mutation holds its kind's write lock across the uniqueness check,
/// the in-memory change and the snapshot write. Reads share the read lock.
///
/// Lock order: when an operation needs two kinds, it takes the referenced
/// kind's read lock (e.g. accounts) before the referencing kind's write lock
/// (e.g. listings), and never the reverse.
pub struct RecordStore {
    /// Store configuration.
    config: StoreConfig,

    /// Lock file for exclusive access.
    _lock_file: File,

    /// Per-kind state.
    slots: HashMap<String, KindSlot>,
}

impl RecordStore {
    /// Open an existing store or create a new one.
    pub fn open_or_create(config: StoreConfig) -> Result<Self> {
        if config.data_dir.exists() {
            Self::open(config)
        } else if config.create_if_missing {
            Self::create(config)
        } else {
            Err(StoreError::NotInitialized)
        }
    }

    /// Create a new store, writing an empty snapshot per kind.
    pub fn create(config: StoreConfig) -> Result<Self> {
        fs::create_dir_all(&config.data_dir)?;
        Self::open(config)
    }

    /// Open an existing store, loading every kind's snapshot.
    ///
    /// Kinds without a snapshot file get an empty one written.
    pub fn open(config: StoreConfig) -> Result<Self> {
        if !config.data_dir.is_dir() {
            return Err(StoreError::NotInitialized);
        }
        Self::validate_kinds(&config.kinds)?;

        let lock_file = Self::acquire_lock(&config.data_dir)?;

        let mut slots = HashMap::with_capacity(config.kinds.len());
        for kind in &config.kinds {
            let snapshot = SnapshotFile::new(&kind.name, config.data_dir.join(kind.snapshot_name()));

            let (collection, skipped) =
                Collection::from_records(&kind.name, &kind.key_field, snapshot.load());
            if skipped > 0 {
                warn!(
                    kind = %kind.name,
                    skipped,
                    "Dropped snapshot records with missing or repeated keys"
                );
            }

            if !snapshot.path().exists() {
                snapshot.write(collection.records())?;
            }

            slots.insert(
                kind.name.clone(),
                KindSlot {
                    config: kind.clone(),
                    snapshot,
                    collection: RwLock::new(collection),
                },
            );
        }

        info!(
            path = %config.data_dir.display(),
            kinds = slots.len(),
            "Record store opened"
        );

        Ok(Self {
            config,
            _lock_file: lock_file,
            slots,
        })
    }

    // --- Reads ---

    /// Find a record by its uniqueness key.
    pub fn find_by_key(&self, kind: &str, key: &str) -> Result<Option<Record>> {
        let slot = self.slot(kind)?;
        let collection = slot.collection.read();
        Ok(collection.get(key).cloned())
    }

    /// Find the first record whose `field` equals the string `value`.
    pub fn find_by_field(&self, kind: &str, field: &str, value: &str) -> Result<Option<Record>> {
        let slot = self.slot(kind)?;
        let collection = slot.collection.read();
        Ok(collection
            .records()
            .iter()
            .find(|r| r.get_str(field) == Some(value))
            .cloned())
    }

    /// All records of a kind in insertion order.
    pub fn list(&self, kind: &str) -> Result<Vec<Record>> {
        let slot = self.slot(kind)?;
        let collection = slot.collection.read();
        Ok(collection.records().to_vec())
    }

    /// Number of records of a kind.
    pub fn len(&self, kind: &str) -> Result<usize> {
        Ok(self.slot(kind)?.collection.read().len())
    }

    /// Configured kind names, in configuration order.
    pub fn kinds(&self) -> Vec<&str> {
        self.config.kinds.iter().map(|k| k.name.as_str()).collect()
    }

    /// Record counts per kind.
    pub fn stats(&self) -> StoreStats {
        let kinds: Vec<(String, usize)> = self
            .config
            .kinds
            .iter()
            .filter_map(|k| {
                self.slots
                    .get(&k.name)
                    .map(|slot| (k.name.clone(), slot.collection.read().len()))
            })
            .collect();
        let total_records = kinds.iter().map(|(_, n)| n).sum();

        StoreStats {
            kinds,
            total_records,
        }
    }

    // --- Mutations ---

    /// Insert a record, filling in the kind's defaults.
    ///
    /// Fails with `DuplicateKey` if the key is taken, leaving the collection
    /// unchanged. Returns the stored record.
    pub fn insert(&self, kind: &str, mut record: Record) -> Result<Record> {
        let slot = self.slot(kind)?;
        record.apply_defaults(&slot.config.defaults);
        self.mutate(slot, |c| c.insert(record).cloned())
    }

    /// Apply a partial update to the record with `key`.
    ///
    /// A changed key is checked against every other record first. Returns
    /// the updated record.
    pub fn update(&self, kind: &str, key: &str, patch: &RecordPatch) -> Result<Record> {
        let slot = self.slot(kind)?;
        self.mutate(slot, |c| c.update(key, patch).cloned())
    }

    /// Apply `patch` to the record with `key` only if `check` accepts it.
    ///
    /// `check` sees the current record under the same write lock as the
    /// update, so nothing can change the record between the two. An error
    /// from `check` is returned as is and leaves the record untouched.
    pub fn update_where(
        &self,
        kind: &str,
        key: &str,
        check: impl FnOnce(&Record) -> Result<()>,
        patch: &RecordPatch,
    ) -> Result<Record> {
        let slot = self.slot(kind)?;
        self.mutate(slot, |c| {
            let current = c
                .get(key)
                .ok_or_else(|| StoreError::not_found(c.kind(), key))?;
            check(current)?;
            c.update(key, patch).cloned()
        })
    }

    /// Insert a record built from the `parent_key` record of `parent_kind`.
    ///
    /// The parent's read lock is held until the insert is persisted, so the
    /// parent cannot be renamed or deleted in between. Fails with
    /// `RecordNotFound` if the parent does not exist.
    pub fn insert_referencing(
        &self,
        kind: &str,
        parent_kind: &str,
        parent_key: &str,
        build: impl FnOnce(&Record) -> Result<Record>,
    ) -> Result<Record> {
        if kind == parent_kind {
            return Err(StoreError::InvalidConfig(format!(
                "kind '{}' cannot reference itself",
                kind
            )));
        }
        let parent_slot = self.slot(parent_kind)?;
        let slot = self.slot(kind)?;

        let parents = parent_slot.collection.read();
        let parent = parents
            .get(parent_key)
            .ok_or_else(|| StoreError::not_found(parent_kind, parent_key))?;

        let mut record = build(parent)?;
        record.apply_defaults(&slot.config.defaults);
        self.mutate(slot, |c| c.insert(record).cloned())
    }

    /// Delete the record with `key`, returning it.
    pub fn delete(&self, kind: &str, key: &str) -> Result<Record> {
        let slot = self.slot(kind)?;
        self.mutate(slot, |c| c.remove(key))
    }

    /// Rewrite every kind's snapshot from memory.
    ///
    /// Used to confirm durability after a `PersistenceFailed`.
    pub fn sync(&self) -> Result<()> {
        for kind in &self.config.kinds {
            if let Some(slot) = self.slots.get(&kind.name) {
                let collection = slot.collection.write();
                slot.snapshot.write(collection.records())?;
            }
        }
        Ok(())
    }

    /// Get the data directory.
    pub fn path(&self) -> &Path {
        &self.config.data_dir
    }

    /// Get the snapshot path for a kind.
    pub fn snapshot_path(&self, kind: &str) -> Result<&Path> {
        Ok(self.slot(kind)?.snapshot.path())
    }

    // --- Helpers ---

    fn slot(&self, kind: &str) -> Result<&KindSlot> {
        self.slots
            .get(kind)
            .ok_or_else(|| StoreError::UnknownKind(kind.to_string()))
    }

    /// Run `op` under the kind's write lock, then persist the collection.
    fn mutate<T>(
        &self,
        slot: &KindSlot,
        op: impl FnOnce(&mut Collection) -> Result<T>,
    ) -> Result<T> {
        let mut collection = slot.collection.write();

        let before = if self.config.rollback_on_persist_failure {
            Some(collection.clone())
        } else {
            None
        };

        let output = op(&mut *collection)?;

        if let Err(e) = slot.snapshot.write(collection.records()) {
            match before {
                Some(before) => {
                    warn!(kind = %slot.config.name, "Snapshot write failed, rolling back");
                    *collection = before;
                }
                None => {
                    warn!(
                        kind = %slot.config.name,
                        "Snapshot write failed, mutation kept in memory"
                    );
                }
            }
            return Err(e);
        }

        Ok(output)
    }

    fn validate_kinds(kinds: &[KindConfig]) -> Result<()> {
        let mut seen = HashSet::new();
        for kind in kinds {
            if kind.name.is_empty() || kind.key_field.is_empty() {
                return Err(StoreError::InvalidConfig(
                    "kind name and key field must not be empty".into(),
                ));
            }
            if kind.name.contains(['/', '\\']) || kind.name.starts_with('.') {
                return Err(StoreError::InvalidConfig(format!(
                    "kind name '{}' is not a plain file stem",
                    kind.name
                )));
            }
            if kind.defaults.contains(&kind.key_field) {
                return Err(StoreError::InvalidConfig(format!(
                    "kind '{}' cannot default its key field '{}'",
                    kind.name, kind.key_field
                )));
            }
            if !seen.insert(kind.name.as_str()) {
                return Err(StoreError::InvalidConfig(format!(
                    "kind '{}' configured twice",
                    kind.name
                )));
            }
        }
        Ok(())
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_path = path.join(LOCK_FILE);
        let lock_file = File::create(lock_path)?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| StoreError::Locked)?;

        Ok(lock_file)
    }
}
