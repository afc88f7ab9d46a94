use crate::codec;
use crate::layout::StoreLayout;
use crate::{fsync_dir, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Longest accepted item path, in bytes.
pub const MAX_PATH_LEN: usize = 2048;

/// A decoded record: path, JSON content and last write time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredItem {
    pub path: String,
    pub content: Value,
    pub last_modified: DateTime<Utc>,
}

/// Selection for [`ItemStore::list`]. Both bounds are optional and combine
/// with AND. `since` is inclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    pub prefix: Option<String>,
    pub since: Option<DateTime<Utc>>,
}

impl ListFilter {
    pub fn all() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    #[must_use]
    pub fn modified_since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn matches(&self, path: &str, last_modified: DateTime<Utc>) -> bool {
        if let Some(ref prefix) = self.prefix {
            if !path.starts_with(prefix.as_str()) {
                return false;
            }
        }
        match self.since {
            Some(since) => last_modified >= since,
            None => true,
        }
    }
}

/// Lazy, finite sequence of records produced by one `list` call.
pub type ItemIter<'a> = Box<dyn Iterator<Item = Result<StoredItem, StoreError>> + Send + 'a>;

/// Path-keyed store of compressed JSON documents.
///
/// Each operation is atomic for its own path; there are no multi-path
/// transactions. Concurrent `put`s to one path are last-write-wins.
pub trait ItemStore: Send + Sync {
    /// Insert or overwrite the document at `path`, stamping `last_modified` with now.
    fn put(&self, path: &str, content: &Value) -> Result<(), StoreError>;

    fn get(&self, path: &str) -> Result<StoredItem, StoreError>;

    fn exists(&self, path: &str) -> Result<bool, StoreError>;

    /// Enumerate matching records in ascending path order. Every call re-reads
    /// the store; nothing is cached between calls.
    fn list(&self, filter: &ListFilter) -> Result<ItemIter<'_>, StoreError>;

    /// Number of readable records.
    fn count(&self) -> Result<usize, StoreError>;
}

pub fn validate_path(path: &str) -> Result<(), StoreError> {
    if path.is_empty() {
        return Err(StoreError::InvalidPath("item path must not be empty".to_owned()));
    }
    if path.len() > MAX_PATH_LEN {
        return Err(StoreError::InvalidPath(format!(
            "item path exceeds {MAX_PATH_LEN} bytes"
        )));
    }
    if path.contains(['\0', '\n', '\r']) {
        return Err(StoreError::InvalidPath(format!(
            "item path contains control characters: {path:?}"
        )));
    }
    Ok(())
}

/// Header line written in front of the compressed content of each record file.
#[derive(Debug, Serialize, Deserialize)]
struct RecordHeader {
    path: String,
    last_modified: DateTime<Utc>,
}

/// File-backed item store.
///
/// Every path maps to one file in `store/items/` named by the blake3 hash of
/// the path. The file holds a single JSON header line followed by the gzip
/// content. Writes go through `NamedTempFile::persist`, so readers observe
/// either the old or the new record, never a mix.
#[derive(Debug)]
pub struct FileItemStore {
    layout: StoreLayout,
}

impl FileItemStore {
    pub fn new(layout: StoreLayout) -> Self {
        Self { layout }
    }

    /// Initialize the layout under `root` if needed and open the store.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let layout = StoreLayout::new(root);
        layout.initialize()?;
        Ok(Self::new(layout))
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    fn record_file(&self, path: &str) -> PathBuf {
        self.layout
            .items_dir()
            .join(blake3::hash(path.as_bytes()).to_hex().as_str())
    }

    fn read_header(file: &Path) -> Result<(RecordHeader, BufReader<File>), StoreError> {
        let mut reader = BufReader::new(File::open(file)?);
        let mut line = Vec::new();
        reader.read_until(b'\n', &mut line)?;
        let header: RecordHeader =
            serde_json::from_slice(&line).map_err(|e| StoreError::CorruptPayload {
                path: file.display().to_string(),
                reason: format!("unreadable record header: {e}"),
            })?;
        Ok((header, reader))
    }

    fn read_record(file: &Path, expected_path: Option<&str>) -> Result<StoredItem, StoreError> {
        let (header, mut reader) = Self::read_header(file)?;
        if let Some(expected) = expected_path {
            if header.path != expected {
                return Err(StoreError::CorruptPayload {
                    path: expected.to_owned(),
                    reason: format!("record file holds '{}'", header.path),
                });
            }
        }
        let mut compressed = Vec::new();
        reader.read_to_end(&mut compressed)?;
        let content = codec::decode_for(&header.path, &compressed)?;
        Ok(StoredItem {
            path: header.path,
            content,
            last_modified: header.last_modified,
        })
    }

    fn record_files(&self) -> Result<Vec<PathBuf>, StoreError> {
        let dir = self.layout.items_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            // Skip in-flight temp files
            if name.to_str().is_some_and(|n| !n.starts_with('.')) && entry.file_type()?.is_file()
            {
                files.push(entry.path());
            }
        }
        Ok(files)
    }
}

impl ItemStore for FileItemStore {
    fn put(&self, path: &str, content: &Value) -> Result<(), StoreError> {
        validate_path(path)?;
        let compressed = codec::encode(content)?;
        let header = serde_json::to_string(&RecordHeader {
            path: path.to_owned(),
            last_modified: Utc::now(),
        })?;

        let dir = self.layout.items_dir();
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(header.as_bytes())?;
        tmp.write_all(b"\n")?;
        tmp.write_all(&compressed)?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.record_file(path))
            .map_err(|e| StoreError::Unavailable(e.error))?;
        fsync_dir(&dir)?;

        tracing::debug!("stored '{path}' ({} compressed bytes)", compressed.len());
        Ok(())
    }

    fn get(&self, path: &str) -> Result<StoredItem, StoreError> {
        validate_path(path)?;
        match Self::read_record(&self.record_file(path), Some(path)) {
            Err(StoreError::Unavailable(e)) if e.kind() == ErrorKind::NotFound => {
                Err(StoreError::NotFound(path.to_owned()))
            }
            other => other,
        }
    }

    fn exists(&self, path: &str) -> Result<bool, StoreError> {
        validate_path(path)?;
        Ok(self.record_file(path).try_exists()?)
    }

    fn list(&self, filter: &ListFilter) -> Result<ItemIter<'_>, StoreError> {
        // Headers are scanned eagerly to filter and order; content is decoded lazily.
        let mut matched: Vec<(String, PathBuf)> = Vec::new();
        let mut corrupt: Vec<StoreError> = Vec::new();
        for file in self.record_files()? {
            match Self::read_header(&file) {
                Ok((header, _)) => {
                    if filter.matches(&header.path, header.last_modified) {
                        matched.push((header.path, file));
                    }
                }
                // Removed between read_dir and open
                Err(StoreError::Unavailable(e)) if e.kind() == ErrorKind::NotFound => {}
                Err(e @ StoreError::CorruptPayload { .. }) => corrupt.push(e),
                Err(e) => return Err(e),
            }
        }
        matched.sort_by(|a, b| a.0.cmp(&b.0));

        let records = matched
            .into_iter()
            .map(|(path, file)| Self::read_record(&file, Some(&path)));
        Ok(Box::new(records.chain(corrupt.into_iter().map(Err))))
    }

    /// Records whose header parses. Files `list` reports as corrupt are not counted.
    fn count(&self) -> Result<usize, StoreError> {
        let mut count = 0;
        for file in self.record_files()? {
            match Self::read_header(&file) {
                Ok(_) => count += 1,
                Err(StoreError::Unavailable(e)) if e.kind() == ErrorKind::NotFound => {}
                Err(StoreError::CorruptPayload { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(count)
    }
}
