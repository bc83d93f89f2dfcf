use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{Config, run_interactive_config, show_config};
use crate::embeddings::{
    EmbeddingChain, EmbeddingError, EmbeddingProvider, RemoteEmbeddingClient,
};
use crate::keys::{CachedKeyStore, FileKeyStore, SecureKeyStore};
use crate::memory::{ContextOptions, MemoryExport, SemanticMemory};
use crate::storage::SqliteStorage;
use crate::store::{Metadata, MetadataFilter, Role, SearchOptions, VectorStore};

const RECORDS_NAMESPACE: &str = "records";
const INDEX_NAMESPACE: &str = "index";

/// Metadata flags accepted by `add`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddOptions {
    pub conversation: Option<String>,
    pub category: Option<String>,
    pub role: Option<Role>,
    pub no_chunk: bool,
}

impl AddOptions {
    fn metadata(&self) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.role = self.role;
        metadata.conversation_id.clone_from(&self.conversation);
        metadata.category.clone_from(&self.category);
        metadata
    }
}

/// The embedding chain described by `config`.
///
/// A remote tier whose API key is missing is left out with a warning.
#[inline]
pub fn build_embedding_chain(config: &Config) -> EmbeddingChain {
    let chain = EmbeddingChain::new();
    let Some(remote) = &config.embeddings.remote else {
        return chain;
    };
    match RemoteEmbeddingClient::from_config(remote) {
        Ok(client) => {
            info!("Remote embeddings enabled: {} ({})", client.endpoint(), client.model());
            chain.with_remote(Arc::new(client))
        }
        Err(EmbeddingError::NotConfigured) => {
            warn!(
                "Remote embeddings disabled: {} is not set",
                remote.api_key_env
            );
            chain
        }
        Err(e) => {
            warn!("Remote embeddings disabled: {}", e);
            chain
        }
    }
}

/// Open the encrypted store under the config's base directory and wire it to the
/// embedding chain
#[inline]
pub async fn open_memory(config: &Config) -> Result<SemanticMemory> {
    let storage = SqliteStorage::open(config.database_path())
        .await
        .with_context(|| {
            format!(
                "Failed to open database: {}",
                config.database_path().display()
            )
        })?;

    let key_store: Arc<dyn SecureKeyStore> = Arc::new(CachedKeyStore::new(Arc::new(
        FileKeyStore::new(config.key_path()),
    )));
    let store = VectorStore::open(
        Arc::new(storage.namespace(RECORDS_NAMESPACE)),
        Arc::new(storage.namespace(INDEX_NAMESPACE)),
        key_store,
        config.store.store_settings(),
    )
    .await
    .context("Failed to initialize vector store")?;

    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(build_embedding_chain(config));
    Ok(
        SemanticMemory::new(Arc::new(store), Some(embedder), config.memory)
            .with_chunking(config.chunking.clone()),
    )
}

/// Show or interactively edit the configuration
#[inline]
pub fn configure(show: bool) -> Result<()> {
    if show {
        let config = Config::load_default().context("Failed to load configuration")?;
        show_config(&config);
        Ok(())
    } else {
        let dir = Config::default_dir().context("Failed to determine configuration directory")?;
        run_interactive_config(&dir)
    }
}

/// Remember a piece of text
#[inline]
pub async fn add_memory(memory: &SemanticMemory, text: &str, options: &AddOptions) -> Result<()> {
    let ids = memory
        .add_memory(text, options.metadata(), !options.no_chunk)
        .await
        .context("Failed to add memory")?;

    match ids.len() {
        0 => println!("Nothing stored (empty text)."),
        1 => println!("Stored memory {}", ids[0]),
        n => {
            println!("Stored memory as {n} chunks:");
            for id in &ids {
                println!("  {id}");
            }
        }
    }
    Ok(())
}

/// Print the memories most similar to `query`
#[inline]
pub async fn search_memories(
    memory: &SemanticMemory,
    query: &str,
    limit: Option<usize>,
    threshold: Option<f32>,
) -> Result<()> {
    let defaults = memory.default_search_options();
    let options = SearchOptions::new(
        limit.unwrap_or(defaults.limit),
        threshold.unwrap_or(defaults.threshold),
    );
    let results = memory
        .search_memories(query, &options)
        .await
        .context("Search failed")?;

    if results.is_empty() {
        println!("No memories matched \"{query}\".");
        return Ok(());
    }

    println!("Found {} matching memories:", results.len());
    println!();
    for (position, result) in results.iter().enumerate() {
        println!(
            "{}. [{:.3}] {}",
            position + 1,
            result.similarity,
            result.record.text
        );
        println!("   ID: {}", result.record.id);
        if let Some(conversation) = &result.record.metadata.conversation_id {
            println!("   Conversation: {conversation}");
        }
        if let Some(category) = &result.record.metadata.category {
            println!("   Category: {category}");
        }
    }
    Ok(())
}

/// Print the prompt-ready context block for `query`
#[inline]
pub async fn show_context(
    memory: &SemanticMemory,
    query: &str,
    max_results: Option<usize>,
    conversation: Option<String>,
) -> Result<()> {
    let options = ContextOptions {
        max_results: max_results.unwrap_or(memory.settings().default_limit),
        min_relevance: memory.settings().default_threshold,
        conversation_id: conversation,
        include_metadata: true,
    };
    let context = memory
        .get_relevant_context(query, &options)
        .await
        .context("Failed to build context")?;

    if context.is_empty() {
        println!("No relevant memories found.");
    } else {
        println!("{context}");
    }
    Ok(())
}

/// Print store statistics
#[inline]
pub async fn show_stats(memory: &SemanticMemory) -> Result<()> {
    let stats = memory.get_stats().await.context("Failed to read stats")?;

    println!("📊 Memory Statistics");
    println!("{}", "=".repeat(40));
    println!("  Memories: {}", stats.store.total_embeddings);
    println!("  Conversations: {}", stats.store.conversation_count);
    println!("  Storage: {} bytes", stats.store.storage_size);
    if let Some(oldest) = stats.store.oldest_embedding.and_then(format_timestamp) {
        println!("  Oldest: {oldest}");
    }
    if let Some(newest) = stats.store.newest_embedding.and_then(format_timestamp) {
        println!("  Newest: {newest}");
    }
    println!(
        "  Embeddings: {}",
        stats.embedding_provider.as_deref().unwrap_or("disabled")
    );
    Ok(())
}

fn format_timestamp(millis: i64) -> Option<String> {
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|date| date.format("%Y-%m-%d %H:%M:%S").to_string())
}

/// Write every memory to `path` as JSON
#[inline]
pub async fn export_memories(memory: &SemanticMemory, path: &Path) -> Result<()> {
    let export = memory
        .export_memories()
        .await
        .context("Failed to export memories")?;
    let json = serde_json::to_string_pretty(&export).context("Failed to serialize export")?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("Failed to write export file: {}", path.display()))?;

    println!(
        "Exported {} memories to {}",
        export.memories.len(),
        path.display()
    );
    Ok(())
}

/// Re-embed and store every memory of an export file
#[inline]
pub async fn import_memories(memory: &SemanticMemory, path: &Path) -> Result<()> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read import file: {}", path.display()))?;
    let export: MemoryExport = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse import file: {}", path.display()))?;

    let bar = if console::user_attended_stderr() {
        ProgressBar::new(export.memories.len() as u64).with_style(
            ProgressStyle::with_template("{bar:40} [{pos}/{len}] Importing memories")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        )
    } else {
        ProgressBar::hidden()
    };

    let imported = memory
        .import_memories_with_progress(&export, |done| bar.set_position(done as u64))
        .await
        .context("Failed to import memories")?;
    bar.finish_and_clear();

    println!(
        "Imported {imported} of {} memories from {}",
        export.memories.len(),
        path.display()
    );
    Ok(())
}

/// Forget one conversation, or everything
#[inline]
pub async fn clear_memories(memory: &SemanticMemory, conversation: Option<&str>) -> Result<()> {
    if let Some(conversation) = conversation {
        let removed = memory
            .clear_conversation(conversation)
            .await
            .context("Failed to clear conversation")?;
        println!("Removed {removed} memories from conversation {conversation}");
    } else {
        memory
            .clear_all_memories()
            .await
            .context("Failed to clear memories")?;
        println!("✓ All memories cleared");
    }
    Ok(())
}

/// Every memory of one conversation, oldest first
#[inline]
pub async fn list_conversation(memory: &SemanticMemory, conversation: &str) -> Result<()> {
    let filter = MetadataFilter::new().conversation(conversation);
    let records = memory
        .store()
        .list_embeddings(Some(&filter))
        .await
        .context("Failed to list memories")?;

    if records.is_empty() {
        println!("No memories for conversation {conversation}.");
        return Ok(());
    }
    for record in &records {
        let role = record.metadata.role.map_or("-", Role::as_str);
        println!("[{role}] {}", record.text);
    }
    Ok(())
}
