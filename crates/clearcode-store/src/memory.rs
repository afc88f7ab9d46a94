use crate::codec;
use crate::items::{validate_path, ItemIter, ItemStore, ListFilter, StoredItem};
use crate::StoreError;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

/// In-memory item store. Content is kept compressed, exactly as on disk.
#[derive(Debug, Default)]
pub struct MemoryItemStore {
    records: RwLock<BTreeMap<String, (Vec<u8>, DateTime<Utc>)>>,
}

impl MemoryItemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ItemStore for MemoryItemStore {
    fn put(&self, path: &str, content: &Value) -> Result<(), StoreError> {
        validate_path(path)?;
        let compressed = codec::encode(content)?;
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_owned(), (compressed, Utc::now()));
        Ok(())
    }

    fn get(&self, path: &str) -> Result<StoredItem, StoreError> {
        validate_path(path)?;
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        let (compressed, last_modified) = records
            .get(path)
            .ok_or_else(|| StoreError::NotFound(path.to_owned()))?;
        Ok(StoredItem {
            path: path.to_owned(),
            content: codec::decode_for(path, compressed)?,
            last_modified: *last_modified,
        })
    }

    fn exists(&self, path: &str) -> Result<bool, StoreError> {
        validate_path(path)?;
        Ok(self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(path))
    }

    fn list(&self, filter: &ListFilter) -> Result<ItemIter<'_>, StoreError> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        let start = filter.prefix.clone().unwrap_or_default();
        let matched: Vec<(String, Vec<u8>, DateTime<Utc>)> = records
            .range(start..)
            .take_while(|(path, _)| {
                filter
                    .prefix
                    .as_deref()
                    .map_or(true, |prefix| path.starts_with(prefix))
            })
            .filter(|(path, (_, ts))| filter.matches(path, *ts))
            .map(|(path, (bytes, ts))| (path.clone(), bytes.clone(), *ts))
            .collect();
        drop(records);

        Ok(Box::new(matched.into_iter().map(
            |(path, compressed, last_modified)| {
                let content = codec::decode_for(&path, &compressed)?;
                Ok(StoredItem {
                    path,
                    content,
                    last_modified,
                })
            },
        )))
    }

    fn count(&self) -> Result<usize, StoreError> {
        Ok(self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len())
    }
}
