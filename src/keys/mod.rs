// Secure key store
// Resolves the 256-bit key that seals the vector store at rest. The key never
// leaves this device: it lives in a private file next to the database.

#[cfg(test)]
mod tests;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::storage::crypto::{self, EncryptionKey, KEY_LEN};
use crate::{MemoryError, Result};

pub const KEY_FILE_NAME: &str = "memory.key";

/// Returns a previously persisted key, or creates and persists a new one
#[async_trait]
pub trait SecureKeyStore: Send + Sync {
    async fn get_or_create_key(&self) -> Result<EncryptionKey>;
}

/// Keeps the key in a file readable only by the current user
#[derive(Debug, Clone)]
pub struct FileKeyStore {
    path: PathBuf,
}

impl FileKeyStore {
    #[inline]
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    /// A key store for the default key file inside `dir`
    #[inline]
    pub fn in_dir<P: AsRef<Path>>(dir: P) -> Self {
        Self::new(dir.as_ref().join(KEY_FILE_NAME))
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_key(path: &Path) -> Result<Option<EncryptionKey>> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => Zeroizing::new(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if bytes.len() != KEY_LEN {
            return Err(MemoryError::Initialization(format!(
                "key file {} holds {} bytes, expected {}",
                path.display(),
                bytes.len(),
                KEY_LEN
            )));
        }

        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        key.copy_from_slice(&bytes);
        Ok(Some(key))
    }

    fn write_key(path: &Path, key: &EncryptionKey) -> Result<()> {
        use std::io::Write;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(path)?;
        file.write_all(&key[..])?;
        file.sync_all()?;
        Ok(())
    }
}

#[async_trait]
impl SecureKeyStore for FileKeyStore {
    async fn get_or_create_key(&self) -> Result<EncryptionKey> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<EncryptionKey> {
            if let Some(key) = Self::read_key(&path)? {
                debug!("Loaded encryption key from {}", path.display());
                return Ok(key);
            }

            let key = crypto::generate_key()?;
            Self::write_key(&path, &key)?;
            info!("Created new encryption key at {}", path.display());
            Ok(key)
        })
        .await
        .map_err(|e| MemoryError::Initialization(format!("key store task failed: {e}")))?
    }
}

/// Always hands out the same key
#[derive(Clone)]
pub struct StaticKeyStore {
    key: EncryptionKey,
}

impl StaticKeyStore {
    #[inline]
    pub fn new(key: [u8; KEY_LEN]) -> Self {
        Self {
            key: Zeroizing::new(key),
        }
    }
}

impl std::fmt::Debug for StaticKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticKeyStore")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
impl SecureKeyStore for StaticKeyStore {
    async fn get_or_create_key(&self) -> Result<EncryptionKey> {
        Ok(self.key.clone())
    }
}

/// Resolves the key from the wrapped store once and reuses it for the rest of the process
pub struct CachedKeyStore {
    inner: Arc<dyn SecureKeyStore>,
    key: OnceCell<EncryptionKey>,
}

impl CachedKeyStore {
    #[inline]
    pub fn new(inner: Arc<dyn SecureKeyStore>) -> Self {
        Self {
            inner,
            key: OnceCell::new(),
        }
    }

    #[inline]
    pub fn is_resolved(&self) -> bool {
        self.key.initialized()
    }
}

#[async_trait]
impl SecureKeyStore for CachedKeyStore {
    async fn get_or_create_key(&self) -> Result<EncryptionKey> {
        let key = self
            .key
            .get_or_try_init(|| self.inner.get_or_create_key())
            .await?;
        Ok(key.clone())
    }
}
