//! Durable collection snapshots.
//!
//! Each kind's collection is stored as a single pretty-printed JSON array.
//! Writes go to an adjacent temp file which is synced and then renamed over
//! the destination, so readers only ever see a complete snapshot.

use crate::error::{Result, StoreError};
use crate::types::Record;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Suffix appended to the destination file name for in-flight writes.
const TEMP_SUFFIX: &str = "tmp";

/// Snapshot file for one record kind.
#[derive(Clone, Debug)]
pub struct SnapshotFile {
    /// Kind name, used in errors and logs.
    kind: String,

    /// Destination path.
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(kind: impl Into<String>, path: impl AsRef<Path>) -> Self {
        Self {
            kind: kind.into(),
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the temp file used during writes (`<file>.tmp`).
    pub fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".");
        name.push(TEMP_SUFFIX);
        self.path.with_file_name(name)
    }

    /// Load the snapshot.
    ///
    /// Missing, empty, or malformed content yields an empty collection.
    pub fn load(&self) -> Vec<Record> {
        let content = match fs::read(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(kind = %self.kind, path = %self.path.display(), "No snapshot, starting empty");
                return Vec::new();
            }
            Err(e) => {
                warn!(
                    kind = %self.kind,
                    path = %self.path.display(),
                    error = %e,
                    "Snapshot unreadable, starting empty"
                );
                return Vec::new();
            }
        };

        if content.iter().all(u8::is_ascii_whitespace) {
            return Vec::new();
        }

        match serde_json::from_slice::<Vec<Record>>(&content) {
            Ok(records) => {
                info!(
                    kind = %self.kind,
                    path = %self.path.display(),
                    records = records.len(),
                    "Snapshot loaded"
                );
                records
            }
            Err(e) => {
                warn!(
                    kind = %self.kind,
                    path = %self.path.display(),
                    error = %e,
                    "Malformed snapshot, starting empty"
                );
                Vec::new()
            }
        }
    }

    /// Write the full collection atomically.
    ///
    /// On failure the destination keeps its previous content and the temp
    /// file is removed on a best-effort basis.
    pub fn write(&self, records: &[Record]) -> Result<()> {
        let temp_path = self.temp_path();

        if temp_path.exists() {
            warn!(path = %temp_path.display(), "Removing stale temp file");
            let _ = fs::remove_file(&temp_path);
        }

        let result = serde_json::to_vec_pretty(records)
            .map_err(StoreError::from)
            .and_then(|encoded| write_synced(&temp_path, &encoded))
            .and_then(|()| fs::rename(&temp_path, &self.path).map_err(StoreError::from));

        match result {
            Ok(()) => {
                sync_parent_dir(&self.path);
                debug!(
                    kind = %self.kind,
                    path = %self.path.display(),
                    records = records.len(),
                    "Snapshot written"
                );
                Ok(())
            }
            Err(e) => {
                warn!(
                    kind = %self.kind,
                    temp_path = %temp_path.display(),
                    error = %e,
                    "Snapshot write failed, cleaning up temp file"
                );
                let _ = fs::remove_file(&temp_path);
                Err(StoreError::PersistenceFailed {
                    kind: self.kind.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }
}

fn write_synced(path: &Path, content: &[u8]) -> Result<()> {
    let mut file = File::create(path)?;
    file.write_all(content)?;
    file.sync_all()?;
    Ok(())
}

/// Persist the rename itself. Not every platform can open a directory, so
/// failures are ignored.
fn sync_parent_dir(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}
