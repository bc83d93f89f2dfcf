use thiserror::Error;

pub type Result<T> = std::result::Result<T, MemoryError>;

#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] embeddings::EmbeddingError),

    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("Vector math error: {0}")]
    Math(#[from] math::MathError),

    #[error("Vector store is not ready: await `VectorStore::ready` before use")]
    NotReady,

    #[error("Vector store initialization failed: {0}")]
    Initialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod commands;
pub mod config;
pub mod context;
pub mod embeddings;
pub mod keys;
pub mod math;
pub mod memory;
pub mod storage;
pub mod store;
