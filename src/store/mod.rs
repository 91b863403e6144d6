pub mod file;
pub mod memory;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

pub use file::FileStorage;
pub use memory::InMemoryStorage;

/// Storage key of the singleton backend configuration.
pub const CONFIG_KEY: &str = "config";

/// Prefix under which role entries are stored (`role/<name>`).
pub const ROLE_PREFIX: &str = "role/";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid storage key '{0}'")]
    InvalidKey(String),

    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode or decode storage entry: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// A raw key/value record. Values are JSON documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEntry {
    pub key: String,
    pub value: Vec<u8>,
}

impl StorageEntry {
    pub fn json<T: Serialize>(key: impl Into<String>, value: &T) -> Result<Self, StorageError> {
        Ok(Self {
            key: key.into(),
            value: serde_json::to_vec(value)?,
        })
    }

    pub fn decode_json<T: DeserializeOwned>(&self) -> Result<T, StorageError> {
        Ok(serde_json::from_slice(&self.value)?)
    }
}

/// Abstraction over the host's persistent key/value storage.
/// Implementations: InMemoryStorage (DashMap), FileStorage (one file per key).
#[async_trait]
pub trait Storage: Send + Sync {
    /// Fetch an entry, `None` if the key is absent.
    async fn get(&self, key: &str) -> Result<Option<StorageEntry>, StorageError>;

    /// Create or overwrite an entry.
    async fn put(&self, entry: StorageEntry) -> Result<(), StorageError>;

    /// Delete an entry. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// List the immediate children of `prefix`. Nested folders come back
    /// with a trailing `/`.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// Rejects keys that would escape a storage root or address nothing.
pub(crate) fn validate_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty() || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..") {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Reduce a flat key set to the children directly under `prefix`.
pub(crate) fn children_of<'a>(keys: impl Iterator<Item = &'a str>, prefix: &str) -> Vec<String> {
    let mut out: Vec<String> = keys
        .filter_map(|k| k.strip_prefix(prefix))
        .filter(|rest| !rest.is_empty())
        .map(|rest| match rest.find('/') {
            Some(idx) => rest[..=idx].to_string(),
            None => rest.to_string(),
        })
        .collect();
    out.sort();
    out.dedup();
    out
}
