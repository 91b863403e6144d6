use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use super::{children_of, validate_key, Storage, StorageEntry, StorageError};

/// Process-local storage backed by a DashMap.
/// Used by the binary when no storage directory is configured, and by tests.
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    entries: Arc<DashMap<String, Vec<u8>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries (for debugging and tests).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<StorageEntry>, StorageError> {
        validate_key(key)?;
        Ok(self.entries.get(key).map(|v| StorageEntry {
            key: key.to_string(),
            value: v.value().clone(),
        }))
    }

    async fn put(&self, entry: StorageEntry) -> Result<(), StorageError> {
        validate_key(&entry.key)?;
        self.entries.insert(entry.key, entry.value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        validate_key(key)?;
        self.entries.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        // collect first: children_of borrows keys and DashMap refs can't outlive the iterator
        let keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        Ok(children_of(keys.iter().map(String::as_str), prefix))
    }
}
