//! Backup directories: one `{endpoint}.json` file per endpoint, each a JSON
//! array of payloads. They are the input of a copy run and the output of a
//! store export.

use crate::report::BatchResult;
use crate::RemoteError;
use chrono::Local;
use clearcode_store::{fsync_dir, EndpointName, ItemStore, ListFilter, StoredItem};
use serde_json::{json, Value};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Name prefix of backup directories, followed by a timestamp.
pub const BACKUP_DIR_PREFIX: &str = "clearcode_backup";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

#[derive(Debug, Clone)]
pub struct BackupSet {
    dir: PathBuf,
}

impl BackupSet {
    /// Open an existing backup directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, RemoteError> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(RemoteError::Backup(format!(
                "directory \"{}\" does not exist",
                dir.display()
            )));
        }
        Ok(Self { dir })
    }

    /// Create a fresh `clearcode_backup_{timestamp}` directory under `parent`.
    pub fn create_in(parent: &Path) -> Result<Self, RemoteError> {
        std::fs::create_dir_all(parent)?;
        let name = format!(
            "{BACKUP_DIR_PREFIX}_{}",
            Local::now().format(TIMESTAMP_FORMAT)
        );
        let dir = parent.join(name);
        std::fs::create_dir(&dir).map_err(|e| {
            RemoteError::Backup(format!("cannot create {}: {e}", dir.display()))
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_for(&self, endpoint: &str) -> PathBuf {
        self.dir.join(format!("{endpoint}.json"))
    }

    /// Payloads backed up for `endpoint`, or `None` when it has no file.
    pub fn load(&self, endpoint: &str) -> Result<Option<Vec<Value>>, RemoteError> {
        let path = self.file_for(endpoint);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let payloads: Vec<Value> = serde_json::from_str(&content).map_err(|e| {
            RemoteError::Backup(format!("{} is not a JSON array: {e}", path.display()))
        })?;
        Ok(Some(payloads))
    }

    /// Atomically write the payload array for `endpoint`.
    pub fn write(&self, endpoint: &str, payloads: &[Value]) -> Result<PathBuf, RemoteError> {
        let data = serde_json::to_vec_pretty(payloads)
            .map_err(|e| RemoteError::Serialization(e.to_string()))?;
        let path = self.file_for(endpoint);
        write_atomic(&self.dir, &path, &data)?;
        tracing::debug!("wrote {} {endpoint} to {}", payloads.len(), path.display());
        Ok(path)
    }
}

fn write_atomic(dir: &Path, path: &Path, data: &[u8]) -> Result<(), RemoteError> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| RemoteError::Io(e.error))?;
    fsync_dir(dir)?;
    Ok(())
}

/// Newest `clearcode_backup*` directory directly under `parent`. Names carry
/// a sortable timestamp, so the lexicographically greatest one wins.
pub fn latest_backup_dir(parent: &Path) -> Result<Option<PathBuf>, RemoteError> {
    let mut latest: Option<PathBuf> = None;
    for entry in std::fs::read_dir(parent)? {
        let entry = entry?;
        let is_backup = entry
            .file_name()
            .to_str()
            .is_some_and(|n| n.starts_with(BACKUP_DIR_PREFIX));
        if !is_backup || !entry.path().is_dir() {
            continue;
        }
        let path = entry.path();
        if latest.as_ref().map_or(true, |l| path.file_name() > l.file_name()) {
            latest = Some(path);
        }
    }
    Ok(latest)
}

/// Stable identity for a stored path: the first 32 hex chars of its blake3 hash.
pub fn identity_for_path(path: &str) -> String {
    let hash = blake3::hash(path.as_bytes()).to_hex();
    hash[..32].to_owned()
}

/// Replication payload for one stored record.
pub fn store_item_payload(item: &StoredItem) -> Value {
    json!({
        "uuid": identity_for_path(&item.path),
        "path": item.path,
        "content": item.content,
        "last_modified": item.last_modified.to_rfc3339(),
    })
}

/// Export the records selected by `filter` as the `endpoint` file of `backup`.
/// Returns the number of payloads written.
pub fn write_store_backup(
    store: &dyn ItemStore,
    backup: &BackupSet,
    endpoint: &EndpointName,
    filter: &ListFilter,
) -> Result<usize, RemoteError> {
    let mut payloads = Vec::new();
    for item in store.list(filter)? {
        payloads.push(store_item_payload(&item?));
    }
    backup.write(endpoint, &payloads)?;
    tracing::info!(
        "exported {} records to {}",
        payloads.len(),
        backup.file_for(endpoint).display()
    );
    Ok(payloads.len())
}

/// Write `copy_results_{timestamp}.json` under `dir` and return its path.
pub fn write_results(dir: &Path, result: &BatchResult) -> Result<PathBuf, RemoteError> {
    let name = format!("copy_results_{}.json", Local::now().format(TIMESTAMP_FORMAT));
    let path = dir.join(name);
    let data = result.to_json_pretty()?;
    write_atomic(dir, &path, data.as_bytes())?;
    Ok(path)
}
