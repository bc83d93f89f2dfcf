// Embeddings module
// Resolves text to vectors through a chain of providers and splits long documents
// into pieces worth embedding.

pub mod chain;
pub mod chunking;
pub mod local;
pub mod on_device;
pub mod remote;

use async_trait::async_trait;
use thiserror::Error;

pub use chain::{DimensionReconciler, EmbeddingChain, EmbeddingTier};
pub use chunking::{ChunkingConfig, TextChunk, chunk_text, reconstruct_from_chunks};
pub use local::{LOCAL_DIMENSION, LocalEmbedder};
pub use on_device::{InferenceEngine, OnDeviceProvider};
pub use remote::RemoteEmbeddingClient;

/// Inference messages that mean "try something else" rather than "this input is bad"
const RECOVERABLE_PATTERNS: &[&str] = &[
    "not initialized",
    "not loaded",
    "no model",
    "unavailable",
    "not available",
    "not supported",
];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EmbeddingError {
    #[error("Embedding model is not initialized")]
    NotInitialized,
    #[error("Embedding capability unavailable: {0}")]
    Unavailable(String),
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Embedding API returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Invalid embedding response: {0}")]
    InvalidResponse(String),
    #[error("Invalid embedding endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("Embedding provider is not configured")]
    NotConfigured,
}

impl EmbeddingError {
    /// Whether the next provider in a chain should be tried
    #[inline]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::NotInitialized | Self::Unavailable(_) | Self::Network(_) | Self::NotConfigured => {
                true
            }
            Self::Http { status, .. } => matches!(status, 408 | 429 | 500..=599),
            Self::Inference(message) => {
                let message = message.to_lowercase();
                RECOVERABLE_PATTERNS.iter().any(|p| message.contains(p))
            }
            Self::InvalidResponse(_) | Self::InvalidEndpoint(_) => false,
        }
    }

    /// A stable name for the kind of failure, used to log each condition once
    #[inline]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NotInitialized => "not-initialized",
            Self::Unavailable(_) => "unavailable",
            Self::Inference(_) => "inference",
            Self::Network(_) => "network",
            Self::Http { .. } => "http",
            Self::InvalidResponse(_) => "invalid-response",
            Self::InvalidEndpoint(_) => "invalid-endpoint",
            Self::NotConfigured => "not-configured",
        }
    }
}

/// Anything that can turn text into a vector
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}
