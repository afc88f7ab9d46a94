//! Compressed item store and local synchronization for ClearCode.
//!
//! This crate provides the storage layer: a gzip JSON `codec`, the `ItemStore`
//! trait with a file-backed `FileItemStore` and an in-memory `MemoryItemStore`,
//! `StoreLayout` for directory structure and format versioning, and the local
//! sync writer that decides create-vs-update for incoming documents.

pub mod codec;
pub mod items;
pub mod layout;
pub mod memory;
pub mod sync;
pub mod types;

pub use items::{FileItemStore, ItemIter, ItemStore, ListFilter, StoredItem, MAX_PATH_LEN};
pub use layout::{StoreLayout, STORE_FORMAT_VERSION};
pub use memory::MemoryItemStore;
pub use sync::{sync_all, sync_one, SyncOutcome, SyncSummary};
pub use types::{EndpointName, IdentityKey};

use std::path::Path;
use thiserror::Error;

/// Fsync a directory so that a preceding `rename()` is durable.
pub fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(#[from] std::io::Error),
    #[error("corrupt payload for '{path}': {reason}")]
    CorruptPayload { path: String, reason: String },
    #[error("item not found: {0}")]
    NotFound(String),
    #[error("invalid item path: {0}")]
    InvalidPath(String),
    #[error("store format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// True for failures of the underlying storage rather than of one record.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}
