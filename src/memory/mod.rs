// Semantic memory
// Ties the embedding chain, the chunker and the vector store together behind a
// text-in, text-out API for prompt assembly.


use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::embeddings::{ChunkingConfig, EmbeddingProvider, chunk_text};
use crate::store::{
    Metadata, MetadataFilter, NewEmbedding, Role, SearchOptions, SearchResult, StoreStats,
    VectorStore,
};
use crate::{MemoryError, Result};

/// Format version written by [`SemanticMemory::export_memories`]
pub const EXPORT_VERSION: u32 = 1;

const CONTEXT_HEADER: &str = "Relevant context from memory:";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySettings {
    /// Texts longer than this many characters are chunked before embedding
    pub chunk_threshold: usize,
    pub default_limit: usize,
    pub default_threshold: f32,
}

impl Default for MemorySettings {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_threshold: 500,
            default_limit: 5,
            default_threshold: 0.3,
        }
    }
}

/// Options for [`SemanticMemory::get_relevant_context`]
#[derive(Debug, Clone, PartialEq)]
pub struct ContextOptions {
    pub max_results: usize,
    /// Minimum cosine similarity for a memory to be included
    pub min_relevance: f32,
    pub conversation_id: Option<String>,
    /// Append a role/category/date line under each memory
    pub include_metadata: bool,
}

impl Default for ContextOptions {
    #[inline]
    fn default() -> Self {
        Self {
            max_results: 5,
            min_relevance: 0.3,
            conversation_id: None,
            include_metadata: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedMemory {
    pub text: String,
    pub metadata: Metadata,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryExport {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub memories: Vec<ExportedMemory>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    #[serde(flatten)]
    pub store: StoreStats,
    /// `None` when no embedding provider is configured
    pub embedding_provider: Option<String>,
}

/// Long-term semantic memory over a [`VectorStore`]
///
/// Without an embedding provider every write is skipped and every search comes back
/// empty, with a single warning, so the caller keeps working without memory.
pub struct SemanticMemory {
    store: Arc<VectorStore>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    settings: MemorySettings,
    chunking: ChunkingConfig,
    warned_disabled: AtomicBool,
}

impl std::fmt::Debug for SemanticMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticMemory")
            .field("store", &self.store)
            .field("embedder", &self.embedder.as_ref().map(|e| e.name().to_string()))
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl SemanticMemory {
    #[inline]
    pub fn new(
        store: Arc<VectorStore>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        settings: MemorySettings,
    ) -> Self {
        Self {
            store,
            embedder,
            settings,
            chunking: ChunkingConfig::default(),
            warned_disabled: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn with_chunking(mut self, chunking: ChunkingConfig) -> Self {
        self.chunking = chunking;
        self
    }

    #[inline]
    pub fn store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    #[inline]
    pub const fn settings(&self) -> &MemorySettings {
        &self.settings
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.embedder.is_some()
    }

    fn embedder(&self, operation: &str) -> Option<&Arc<dyn EmbeddingProvider>> {
        if self.embedder.is_none() {
            if !self.warned_disabled.swap(true, Ordering::Relaxed) {
                warn!("No embedding provider configured; semantic memory is disabled");
            }
            debug!("Skipping {} without an embedding provider", operation);
        }
        self.embedder.as_ref()
    }

    /// Embed and store `text`, chunking it first when it is long.
    ///
    /// Returns the ids of the stored records, one per chunk.
    #[inline]
    pub async fn add_memory(
        &self,
        text: &str,
        metadata: Metadata,
        chunk_if_long: bool,
    ) -> Result<Vec<String>> {
        let Some(embedder) = self.embedder("add_memory") else {
            return Ok(Vec::new());
        };
        let text = text.trim();
        if text.is_empty() {
            debug!("Ignoring empty memory");
            return Ok(Vec::new());
        }

        let length = text.chars().count();
        if !chunk_if_long || length <= self.settings.chunk_threshold {
            let vector = embedder.embed(text).await?;
            let id = self
                .store
                .add_embedding(NewEmbedding::new(text, vector).with_metadata(metadata))
                .await?;
            return Ok(vec![id]);
        }

        let chunks = chunk_text(text, &self.chunking);
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = embedder.embed_batch(&texts).await?;
        if vectors.len() != texts.len() {
            return Err(MemoryError::Config(format!(
                "embedding provider returned {} vectors for {} chunks",
                vectors.len(),
                texts.len()
            )));
        }

        let total = chunks.len();
        let mut ids = Vec::with_capacity(total);
        for (chunk, vector) in chunks.into_iter().zip(vectors) {
            let mut chunk_metadata = metadata.clone();
            chunk_metadata.is_chunk = Some(true);
            chunk_metadata.chunk_index = Some(chunk.index);
            chunk_metadata.chunk_total = Some(total);
            chunk_metadata.original_text_length = Some(length);
            let embedding = NewEmbedding::new(chunk.text, vector).with_metadata(chunk_metadata);
            ids.push(self.store.add_embedding(embedding).await?);
        }

        info!("Stored {}-character memory as {} chunks", length, total);
        Ok(ids)
    }

    /// Memories most similar to `query`, best first
    #[inline]
    pub async fn search_memories(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        let Some(embedder) = self.embedder("search_memories") else {
            return Ok(Vec::new());
        };
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let vector = embedder.embed(query).await?;
        self.store.search(&vector, options).await
    }

    /// A prompt-ready block of the memories relevant to `query`.
    ///
    /// Empty when nothing clears `min_relevance`.
    #[inline]
    pub async fn get_relevant_context(
        &self,
        query: &str,
        options: &ContextOptions,
    ) -> Result<String> {
        let mut search = SearchOptions::new(options.max_results, options.min_relevance);
        if let Some(conversation) = &options.conversation_id {
            search = search.with_filter(MetadataFilter::new().conversation(conversation.as_str()));
        }

        let results = self.search_memories(query, &search).await?;
        Ok(format_context(&results, options.include_metadata))
    }

    /// Remember one turn of a conversation
    #[inline]
    pub async fn add_conversation_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
    ) -> Result<Vec<String>> {
        let metadata = Metadata::new()
            .with_role(role)
            .with_conversation(conversation_id);
        self.add_memory(content, metadata, true).await
    }

    /// Earlier turns of `conversation_id` relevant to `query`, oldest first
    #[inline]
    pub async fn get_relevant_conversation_history(
        &self,
        conversation_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        let options = SearchOptions::new(limit, self.settings.default_threshold)
            .with_filter(MetadataFilter::new().conversation(conversation_id));
        let mut results = self.search_memories(query, &options).await?;
        results.sort_by_key(|r| r.record.timestamp);
        Ok(results)
    }

    /// [`SearchOptions`] built from the configured defaults
    #[inline]
    pub fn default_search_options(&self) -> SearchOptions {
        SearchOptions::new(self.settings.default_limit, self.settings.default_threshold)
    }

    #[inline]
    pub async fn clear_all_memories(&self) -> Result<()> {
        self.store.clear_all().await
    }

    /// Forget every memory of one conversation. Returns how many records were removed.
    #[inline]
    pub async fn clear_conversation(&self, conversation_id: &str) -> Result<usize> {
        self.store
            .delete_by_filter(&MetadataFilter::new().conversation(conversation_id))
            .await
    }

    /// Every stored memory without its vector, oldest first
    #[inline]
    pub async fn export_memories(&self) -> Result<MemoryExport> {
        let memories = self
            .store
            .list_embeddings(None)
            .await?
            .into_iter()
            .map(|record| ExportedMemory {
                text: record.text,
                metadata: record.metadata,
                timestamp: record.timestamp,
            })
            .collect::<Vec<_>>();
        debug!("Exported {} memories", memories.len());

        Ok(MemoryExport {
            version: EXPORT_VERSION,
            exported_at: Utc::now(),
            memories,
        })
    }

    /// Re-embed and store every memory of an export. Returns how many were stored.
    ///
    /// Texts are embedded again with the current provider rather than trusting vectors
    /// from another session. Imported records get fresh timestamps.
    #[inline]
    pub async fn import_memories(&self, export: &MemoryExport) -> Result<usize> {
        self.import_memories_with_progress(export, |_| {}).await
    }

    /// [`SemanticMemory::import_memories`], calling `progress` after each memory
    #[inline]
    pub async fn import_memories_with_progress<F>(
        &self,
        export: &MemoryExport,
        mut progress: F,
    ) -> Result<usize>
    where
        F: FnMut(usize) + Send,
    {
        if export.version != EXPORT_VERSION {
            return Err(MemoryError::Config(format!(
                "unsupported export version {} (expected {EXPORT_VERSION})",
                export.version
            )));
        }
        let Some(embedder) = self.embedder("import_memories") else {
            return Ok(0);
        };

        let mut imported = 0;
        for (position, memory) in export.memories.iter().enumerate() {
            let text = memory.text.trim();
            if !text.is_empty() {
                let vector = embedder.embed(text).await?;
                self.store
                    .add_embedding(
                        NewEmbedding::new(text, vector).with_metadata(memory.metadata.clone()),
                    )
                    .await?;
                imported += 1;
            }
            progress(position + 1);
        }

        info!("Imported {} of {} memories", imported, export.memories.len());
        Ok(imported)
    }

    #[inline]
    pub async fn get_stats(&self) -> Result<MemoryStats> {
        Ok(MemoryStats {
            store: self.store.stats().await?,
            embedding_provider: self.embedder.as_ref().map(|e| e.name().to_string()),
        })
    }
}

fn format_context(results: &[SearchResult], include_metadata: bool) -> String {
    if results.is_empty() {
        return String::new();
    }

    let mut block = String::from(CONTEXT_HEADER);
    for (position, result) in results.iter().enumerate() {
        let relevance = (result.similarity * 100.0).round();
        let _ = write!(
            block,
            "\n[{}] (relevance: {relevance}%) {}",
            position + 1,
            result.record.text
        );
        if include_metadata {
            let line = metadata_line(&result.record.metadata, result.record.timestamp);
            let _ = write!(block, "\n    ({line})");
        }
    }
    block
}

fn metadata_line(metadata: &Metadata, timestamp: i64) -> String {
    let mut parts = Vec::with_capacity(3);
    if let Some(role) = metadata.role {
        parts.push(format!("role: {role}"));
    }
    if let Some(category) = &metadata.category {
        parts.push(format!("category: {category}"));
    }
    if let Some(date) = DateTime::from_timestamp_millis(timestamp) {
        parts.push(date.format("%Y-%m-%d").to_string());
    }
    parts.join(", ")
}

static GLOBAL: OnceLock<Arc<SemanticMemory>> = OnceLock::new();

/// Make `memory` the process-wide instance returned by [`global`].
///
/// Returns the rejected instance if one was already installed.
#[inline]
pub fn install_global(memory: Arc<SemanticMemory>) -> std::result::Result<(), Arc<SemanticMemory>> {
    GLOBAL.set(memory)
}

#[inline]
pub fn global() -> Option<Arc<SemanticMemory>> {
    GLOBAL.get().map(Arc::clone)
}
