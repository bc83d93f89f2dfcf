use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tokio::sync::RwLock;
use tracing::{debug, info};
use zeroize::Zeroizing;

use super::crypto::{self, EncryptionKey};
use super::{KeyValueBackend, KvValue, StorageError};

/// An SQLite file holding any number of encrypted namespaces
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    #[inline]
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::Sqlite(sqlx::Error::Io(e)))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        debug!("Opened key-value storage at {}", path.display());
        Ok(storage)
    }

    async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::migrate!("src/storage/migrations")
            .run(&self.pool)
            .await?;
        Ok(())
    }

    /// A handle on one namespace. Handles are locked until [`KeyValueBackend::recrypt`]
    /// installs a key.
    #[inline]
    pub fn namespace(&self, name: &str) -> SqliteBackend {
        SqliteBackend {
            pool: self.pool.clone(),
            namespace: name.to_string(),
            key: RwLock::new(None),
        }
    }

    #[inline]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// One encrypted namespace inside a [`SqliteStorage`]
pub struct SqliteBackend {
    pool: SqlitePool,
    namespace: String,
    key: RwLock<Option<EncryptionKey>>,
}

impl std::fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend")
            .field("namespace", &self.namespace)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl SqliteBackend {
    fn aad(&self, key: &str) -> Vec<u8> {
        format!("{}\u{0}{}", self.namespace, key).into_bytes()
    }

    fn decode(
        &self,
        slot: &str,
        enc_key: Option<&EncryptionKey>,
        nonce: &[u8],
        payload: &[u8],
    ) -> Result<KvValue, StorageError> {
        let plaintext = if nonce.is_empty() {
            payload.to_vec()
        } else {
            let enc_key = enc_key.ok_or(StorageError::Locked)?;
            crypto::open(enc_key, &self.aad(slot), nonce, payload)?
        };
        Ok(serde_json::from_slice(&plaintext)?)
    }
}

#[async_trait]
impl KeyValueBackend for SqliteBackend {
    async fn set(&self, key: &str, value: KvValue) -> Result<(), StorageError> {
        let guard = self.key.read().await;
        let enc_key = guard.as_ref().ok_or(StorageError::Locked)?;

        let plaintext = serde_json::to_vec(&value)?;
        let (ciphertext, nonce) = crypto::seal(enc_key, &self.aad(key), &plaintext)?;
        drop(guard);

        sqlx::query(
            "INSERT INTO kv_entries (namespace, key, nonce, ciphertext) VALUES (?, ?, ?, ?)
             ON CONFLICT(namespace, key) DO UPDATE SET
                nonce = excluded.nonce,
                ciphertext = excluded.ciphertext,
                updated_date = CURRENT_TIMESTAMP",
        )
        .bind(&self.namespace)
        .bind(key)
        .bind(nonce.to_vec())
        .bind(ciphertext)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<KvValue>, StorageError> {
        let row = sqlx::query(
            "SELECT nonce, ciphertext FROM kv_entries WHERE namespace = ? AND key = ?",
        )
        .bind(&self.namespace)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let nonce: Vec<u8> = row.try_get("nonce")?;
        let payload: Vec<u8> = row.try_get("ciphertext")?;

        let guard = self.key.read().await;
        self.decode(key, guard.as_ref(), &nonce, &payload).map(Some)
    }

    async fn contains(&self, key: &str) -> Result<bool, StorageError> {
        let found = sqlx::query("SELECT 1 FROM kv_entries WHERE namespace = ? AND key = ?")
            .bind(&self.namespace)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM kv_entries WHERE namespace = ? AND key = ?")
            .bind(&self.namespace)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn clear_all(&self) -> Result<(), StorageError> {
        let result = sqlx::query("DELETE FROM kv_entries WHERE namespace = ?")
            .bind(&self.namespace)
            .execute(&self.pool)
            .await?;
        debug!(
            "Cleared {} entries from namespace '{}'",
            result.rows_affected(),
            self.namespace
        );
        Ok(())
    }

    async fn all_keys(&self) -> Result<Vec<String>, StorageError> {
        let keys: Vec<String> =
            sqlx::query_scalar("SELECT key FROM kv_entries WHERE namespace = ? ORDER BY key")
                .bind(&self.namespace)
                .fetch_all(&self.pool)
                .await?;
        Ok(keys)
    }

    /// Re-seal every value under `new_key`.
    ///
    /// Plaintext rows are sealed for the first time. Rows sealed under the previously
    /// installed key are re-sealed. When no key was installed yet the rows must already
    /// be sealed under `new_key`; a mismatch fails rather than silently dropping data.
    async fn recrypt(&self, new_key: &EncryptionKey) -> Result<(), StorageError> {
        let mut guard = self.key.write().await;
        let old_key = guard.as_ref().map(|k| Zeroizing::new(**k));
        let rotating = old_key.as_ref().is_some_and(|old| old[..] != new_key[..]);

        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query("SELECT key, nonce, ciphertext FROM kv_entries WHERE namespace = ?")
            .bind(&self.namespace)
            .fetch_all(&mut *tx)
            .await?;

        let mut resealed = 0usize;
        let mut verified = false;
        for row in rows {
            let slot: String = row.try_get("key")?;
            let nonce: Vec<u8> = row.try_get("nonce")?;
            let payload: Vec<u8> = row.try_get("ciphertext")?;

            let plaintext = if nonce.is_empty() {
                payload
            } else if rotating {
                let old = old_key.as_ref().ok_or(StorageError::Locked)?;
                crypto::open(old, &self.aad(&slot), &nonce, &payload)?
            } else {
                if !verified {
                    crypto::open(new_key, &self.aad(&slot), &nonce, &payload)?;
                    verified = true;
                }
                continue;
            };

            let (ciphertext, nonce) = crypto::seal(new_key, &self.aad(&slot), &plaintext)?;
            sqlx::query(
                "UPDATE kv_entries SET nonce = ?, ciphertext = ?, updated_date = CURRENT_TIMESTAMP
                 WHERE namespace = ? AND key = ?",
            )
            .bind(nonce.to_vec())
            .bind(ciphertext)
            .bind(&self.namespace)
            .bind(&slot)
            .execute(&mut *tx)
            .await?;
            resealed += 1;
        }

        tx.commit().await?;
        *guard = Some(Zeroizing::new(**new_key));

        info!(
            "Installed encryption key for namespace '{}' ({} values re-sealed)",
            self.namespace, resealed
        );
        Ok(())
    }

    async fn storage_size(&self) -> Result<u64, StorageError> {
        let size: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(LENGTH(key) + LENGTH(nonce) + LENGTH(ciphertext)), 0)
             FROM kv_entries WHERE namespace = ?",
        )
        .bind(&self.namespace)
        .fetch_one(&self.pool)
        .await?;
        Ok(u64::try_from(size).unwrap_or_default())
    }
}
