use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use super::crypto::EncryptionKey;
use super::{KeyValueBackend, KvValue, StorageError};

/// A non-persistent backend, used for tests and for callers that do not need storage
/// to survive a restart.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    entries: Mutex<BTreeMap<String, KvValue>>,
    keyed: AtomicBool,
}

impl InMemoryBackend {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    #[inline]
    pub fn has_key(&self) -> bool {
        self.keyed.load(Ordering::Acquire)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, KvValue>> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl KeyValueBackend for InMemoryBackend {
    async fn set(&self, key: &str, value: KvValue) -> Result<(), StorageError> {
        self.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<KvValue>, StorageError> {
        Ok(self.lock().get(key).cloned())
    }

    async fn contains(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.lock().contains_key(key))
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.lock().remove(key).is_some())
    }

    async fn clear_all(&self) -> Result<(), StorageError> {
        self.lock().clear();
        Ok(())
    }

    async fn all_keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.lock().keys().cloned().collect())
    }

    // Nothing is written anywhere, so there is nothing to re-seal.
    async fn recrypt(&self, _key: &EncryptionKey) -> Result<(), StorageError> {
        self.keyed.store(true, Ordering::Release);
        Ok(())
    }

    async fn storage_size(&self) -> Result<u64, StorageError> {
        let entries = self.lock();
        let mut total = 0u64;
        for (key, value) in entries.iter() {
            total += (key.len() + serde_json::to_vec(value)?.len()) as u64;
        }
        Ok(total)
    }
}
