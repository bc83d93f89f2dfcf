use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tempfile::TempDir;

use super::*;

#[tokio::test]
async fn file_key_store_creates_then_reuses_key() {
    let dir = TempDir::new().expect("should create temp dir");
    let store = FileKeyStore::in_dir(dir.path());

    let first = store.get_or_create_key().await.expect("should create key");
    assert!(store.path().exists());

    let second = FileKeyStore::in_dir(dir.path())
        .get_or_create_key()
        .await
        .expect("should load key");
    assert_eq!(first[..], second[..]);
}

#[cfg(unix)]
#[tokio::test]
async fn file_key_store_restricts_permissions() {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().expect("should create temp dir");
    let store = FileKeyStore::in_dir(dir.path().join("nested"));
    store.get_or_create_key().await.expect("should create key");

    let mode = std::fs::metadata(store.path())
        .expect("should stat key file")
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o600);
}

#[tokio::test]
async fn file_key_store_rejects_truncated_key() {
    let dir = TempDir::new().expect("should create temp dir");
    let path = dir.path().join(KEY_FILE_NAME);
    std::fs::write(&path, [1u8; 5]).expect("should write key file");

    let result = FileKeyStore::new(&path).get_or_create_key().await;
    assert!(matches!(result, Err(MemoryError::Initialization(_))));
}

#[tokio::test]
async fn static_key_store_returns_its_key() {
    let store = StaticKeyStore::new([3u8; KEY_LEN]);
    let key = store.get_or_create_key().await.expect("should return key");
    assert_eq!(key[..], [3u8; KEY_LEN]);
    assert!(!format!("{store:?}").contains('3'));
}

struct CountingStore {
    calls: AtomicUsize,
}

#[async_trait]
impl SecureKeyStore for CountingStore {
    async fn get_or_create_key(&self) -> Result<EncryptionKey> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Zeroizing::new([9u8; KEY_LEN]))
    }
}

#[tokio::test]
async fn cached_key_store_resolves_once() {
    let inner = Arc::new(CountingStore {
        calls: AtomicUsize::new(0),
    });
    let cached = CachedKeyStore::new(Arc::clone(&inner) as Arc<dyn SecureKeyStore>);
    assert!(!cached.is_resolved());

    for _ in 0..3 {
        let key = cached.get_or_create_key().await.expect("should resolve key");
        assert_eq!(key[..], [9u8; KEY_LEN]);
    }
    assert!(cached.is_resolved());
    assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
}
