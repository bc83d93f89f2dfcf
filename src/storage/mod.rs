// Key-value storage adapter
// A thin facade over an encrypted key-value backend. The vector store keeps its
// records and its indexes in two independent namespaces of one of these.


pub mod crypto;
pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use crypto::{EncryptionKey, KEY_LEN};
pub use memory::InMemoryBackend;
pub use sqlite::{SqliteBackend, SqliteStorage};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Sqlite(#[from] sqlx::Error),
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("Encryption error: {0}")]
    Crypto(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Value stored under '{key}' is not a {expected}")]
    TypeMismatch { key: String, expected: &'static str },
    #[error("Storage is locked: no encryption key has been installed")]
    Locked,
}

/// The primitive values a backend can hold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KvValue {
    Bool(bool),
    Number(f64),
    String(String),
}

impl From<String> for KvValue {
    #[inline]
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&str> for KvValue {
    #[inline]
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<f64> for KvValue {
    #[inline]
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<bool> for KvValue {
    #[inline]
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// One namespace of an embedded key-value store
#[async_trait]
pub trait KeyValueBackend: Send + Sync {
    async fn set(&self, key: &str, value: KvValue) -> Result<(), StorageError>;

    async fn get(&self, key: &str) -> Result<Option<KvValue>, StorageError>;

    async fn contains(&self, key: &str) -> Result<bool, StorageError>;

    /// Returns whether a value was removed
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;

    async fn clear_all(&self) -> Result<(), StorageError>;

    async fn all_keys(&self) -> Result<Vec<String>, StorageError>;

    /// Install `key` as the encryption key, re-sealing existing values as needed
    async fn recrypt(&self, key: &EncryptionKey) -> Result<(), StorageError>;

    /// Approximate bytes used by this namespace
    async fn storage_size(&self) -> Result<u64, StorageError>;

    async fn get_string(&self, key: &str) -> Result<Option<String>, StorageError> {
        match self.get(key).await? {
            None => Ok(None),
            Some(KvValue::String(s)) => Ok(Some(s)),
            Some(_) => Err(StorageError::TypeMismatch {
                key: key.to_string(),
                expected: "string",
            }),
        }
    }

    async fn get_number(&self, key: &str) -> Result<Option<f64>, StorageError> {
        match self.get(key).await? {
            None => Ok(None),
            Some(KvValue::Number(n)) => Ok(Some(n)),
            Some(_) => Err(StorageError::TypeMismatch {
                key: key.to_string(),
                expected: "number",
            }),
        }
    }

    async fn get_bool(&self, key: &str) -> Result<Option<bool>, StorageError> {
        match self.get(key).await? {
            None => Ok(None),
            Some(KvValue::Bool(b)) => Ok(Some(b)),
            Some(_) => Err(StorageError::TypeMismatch {
                key: key.to_string(),
                expected: "bool",
            }),
        }
    }
}
