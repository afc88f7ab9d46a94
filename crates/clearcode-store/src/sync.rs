//! Local sync writer: stores incoming documents and reports create-vs-update.
//!
//! The existence check and the write are two separate store operations. A
//! concurrent writer can only change which label is reported; `put` is
//! last-write-wins, so the stored data is correct either way.

use crate::items::ItemStore;
use crate::StoreError;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    Created,
    Updated,
}

impl std::fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncOutcome::Created => write!(f, "created"),
            SyncOutcome::Updated => write!(f, "updated"),
        }
    }
}

/// Counts produced by [`sync_all`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub created: usize,
    pub updated: usize,
}

impl SyncSummary {
    pub fn total(&self) -> usize {
        self.created + self.updated
    }

    fn add(&mut self, outcome: SyncOutcome) {
        match outcome {
            SyncOutcome::Created => self.created += 1,
            SyncOutcome::Updated => self.updated += 1,
        }
    }
}

/// Write one document at `path`, reporting whether it replaced an existing record.
pub fn sync_one(
    store: &dyn ItemStore,
    path: &str,
    content: &Value,
) -> Result<SyncOutcome, StoreError> {
    let outcome = if store.exists(path)? {
        SyncOutcome::Updated
    } else {
        SyncOutcome::Created
    };
    store.put(path, content)?;
    tracing::debug!("{outcome} '{path}'");
    Ok(outcome)
}

/// Sync a sequence of documents. The first store failure aborts the run.
pub fn sync_all<I>(store: &dyn ItemStore, documents: I) -> Result<SyncSummary, StoreError>
where
    I: IntoIterator<Item = (String, Value)>,
{
    let mut summary = SyncSummary::default();
    for (path, content) in documents {
        summary.add(sync_one(store, &path, &content)?);
    }
    tracing::info!(
        "synced {} documents ({} created, {} updated)",
        summary.total(),
        summary.created,
        summary.updated
    );
    Ok(summary)
}
