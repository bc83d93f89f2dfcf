#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

// Store behaviour across the SQLite backend, key stores and the CLI wiring

use std::sync::Arc;

use tempfile::TempDir;

use rag_memory::MemoryError;
use rag_memory::commands::open_memory;
use rag_memory::config::Config;
use rag_memory::keys::StaticKeyStore;
use rag_memory::storage::SqliteStorage;
use rag_memory::store::{
    Metadata, MetadataFilter, NewEmbedding, SearchOptions, StoreSettings, VectorStore,
};

async fn open_sqlite_store(dir: &TempDir, key: [u8; 32]) -> Result<VectorStore, MemoryError> {
    let storage = SqliteStorage::open(dir.path().join("memory.db")).await?;
    VectorStore::open(
        Arc::new(storage.namespace("records")),
        Arc::new(storage.namespace("index")),
        Arc::new(StaticKeyStore::new(key)),
        StoreSettings::default(),
    )
    .await
}

#[tokio::test]
async fn oldest_records_are_evicted_past_the_limit() {
    let store = VectorStore::in_memory(StoreSettings {
        max_embeddings: 3,
        max_age_days: 0,
        compress_vectors: false,
    })
    .await
    .expect("can open store");

    for i in 0..5u8 {
        store
            .add_embedding(NewEmbedding::new(
                format!("memory {i}"),
                vec![1.0, f32::from(i)],
            ))
            .await
            .expect("can add embedding");
    }

    let texts: Vec<String> = store
        .list_embeddings(None)
        .await
        .expect("can list")
        .into_iter()
        .map(|r| r.text)
        .collect();
    assert_eq!(texts, vec!["memory 2", "memory 3", "memory 4"]);
    assert_eq!(store.count().await.expect("can count"), 3);
}

#[tokio::test]
async fn sqlite_store_persists_under_the_same_key() {
    let dir = TempDir::new().expect("can create temp dir");
    let key = [7u8; 32];

    let id = {
        let store = open_sqlite_store(&dir, key).await.expect("can open store");
        store
            .add_embedding(
                NewEmbedding::new("kept across restarts", vec![0.6, 0.8])
                    .with_metadata(Metadata::new().with_conversation("c1")),
            )
            .await
            .expect("can add embedding")
    };

    let store = open_sqlite_store(&dir, key).await.expect("can reopen store");
    let record = store
        .get_embedding(&id)
        .await
        .expect("can read")
        .expect("record should survive a restart");
    assert_eq!(record.text, "kept across restarts");
    assert_eq!(record.vector, vec![0.6, 0.8]);

    let listed = store
        .list_embeddings(Some(&MetadataFilter::new().conversation("c1")))
        .await
        .expect("can list");
    assert_eq!(listed.len(), 1);

    let results = store
        .search(&[0.6, 0.8], &SearchOptions::new(5, 0.9))
        .await
        .expect("can search");
    assert_eq!(results.len(), 1);
}

#[tokio::test]
async fn sqlite_store_refuses_a_different_key() {
    let dir = TempDir::new().expect("can create temp dir");
    {
        let store = open_sqlite_store(&dir, [1u8; 32]).await.expect("can open store");
        store
            .add_embedding(NewEmbedding::new("secret", vec![1.0]))
            .await
            .expect("can add embedding");
    }

    let result = open_sqlite_store(&dir, [2u8; 32]).await;
    assert!(matches!(result, Err(MemoryError::Initialization(_))));
}

#[tokio::test]
async fn cli_wiring_remembers_between_sessions() {
    let dir = TempDir::new().expect("can create temp dir");
    let config = Config {
        base_dir: dir.path().to_path_buf(),
        ..Config::default()
    };

    {
        let memory = open_memory(&config).await.expect("can open memory");
        memory
            .add_memory("The Eiffel Tower is in Paris.", Metadata::new(), true)
            .await
            .expect("can add memory");
    }
    assert!(config.key_path().exists());
    assert!(config.database_path().exists());

    let memory = open_memory(&config).await.expect("can reopen memory");
    let results = memory
        .search_memories("Eiffel Tower", &SearchOptions::new(1, 0.0))
        .await
        .expect("can search");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].record.text, "The Eiffel Tower is in Paris.");
}
