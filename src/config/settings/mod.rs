
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

use crate::context::ContextSettings;
use crate::embeddings::LOCAL_DIMENSION;
use crate::embeddings::chunking::ChunkingConfig;
use crate::keys::KEY_FILE_NAME;
use crate::memory::MemorySettings;
use crate::store::StoreSettings;

/// Overrides the default base directory
pub const HOME_ENV: &str = "RAG_MEMORY_HOME";

const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub embeddings: EmbeddingsConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub memory: MemorySettings,
    #[serde(default)]
    pub context: ContextSettings,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    pub max_embeddings: usize,
    /// `0` disables age eviction
    pub max_age_days: u32,
    pub compress_vectors: bool,
    /// Relative to the base directory
    pub database_file: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let settings = StoreSettings::default();
        Self {
            max_embeddings: settings.max_embeddings,
            max_age_days: settings.max_age_days,
            compress_vectors: settings.compress_vectors,
            database_file: "memory.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EmbeddingsConfig {
    pub local_dimension: usize,
    /// Remote tier; disabled when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteEmbeddingConfig>,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            local_dimension: LOCAL_DIMENSION,
            remote: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RemoteEmbeddingConfig {
    pub endpoint: String,
    pub model: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    pub timeout_seconds: u64,
    pub retry_attempts: u32,
}

impl Default for RemoteEmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/embeddings".to_string(),
            model: "text-embedding-3-small".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_seconds: 30,
            retry_attempts: 3,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid max embeddings: {0} (must be between 1 and 1000000)")]
    InvalidMaxEmbeddings(usize),
    #[error("Invalid max age: {0} days (must be at most 3650; 0 disables age eviction)")]
    InvalidMaxAge(u32),
    #[error("Invalid database file name: '{0}' (cannot be empty)")]
    InvalidDatabaseFile(String),
    #[error("Invalid local embedding dimension: {0} (must be 384)")]
    InvalidLocalDimension(usize),
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid API key variable: '{0}' (cannot be empty)")]
    InvalidApiKeyEnv(String),
    #[error("Invalid request timeout: {0} (must be between 1 and 300 seconds)")]
    InvalidTimeout(u64),
    #[error("Invalid retry attempts: {0} (must be between 1 and 10)")]
    InvalidRetryAttempts(u32),
    #[error("Invalid max chunk size: {0} (must be between 100 and 8192)")]
    InvalidMaxChunkSize(usize),
    #[error("Min chunk size ({0}) must be less than max chunk size ({1})")]
    MinChunkSizeTooLarge(usize, usize),
    #[error("Overlap size ({0}) must be less than min chunk size ({1})")]
    OverlapTooLarge(usize, usize),
    #[error("Invalid chunk threshold: {0} (must be at least 1)")]
    InvalidChunkThreshold(usize),
    #[error("Invalid default limit: {0} (must be between 1 and 100)")]
    InvalidDefaultLimit(usize),
    #[error("Invalid default threshold: {0} (must be between 0 and 1)")]
    InvalidDefaultThreshold(f32),
    #[error("Invalid max tokens: {0} (must be at least 1)")]
    InvalidMaxTokens(usize),
    #[error("Reserve tokens ({0}) must be less than max tokens ({1})")]
    ReserveTooLarge(usize, usize),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    /// `$RAG_MEMORY_HOME`, or `rag-memory` under the platform's local data directory
    #[inline]
    pub fn default_dir() -> Result<PathBuf, ConfigError> {
        if let Some(home) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
            return Ok(PathBuf::from(home));
        }
        dirs::data_local_dir()
            .map(|dir| dir.join("rag-memory"))
            .ok_or(ConfigError::DirectoryError)
    }

    /// Load from the default directory
    #[inline]
    pub fn load_default() -> Result<Self> {
        let dir = Self::default_dir().context("Failed to determine configuration directory")?;
        Self::load(dir)
    }

    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join(CONFIG_FILE_NAME);

        if !config_path.exists() {
            return Ok(Self {
                base_dir: config_dir.as_ref().to_path_buf(),
                ..Self::default()
            });
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = config_dir.as_ref().to_path_buf();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_dir = self.get_base_dir();

        fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    /// Get the base directory for the application
    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.store.validate()?;
        self.embeddings.validate()?;
        self.validate_chunking_config()?;
        self.validate_memory_config()?;
        self.validate_context_config()?;
        Ok(())
    }

    fn validate_chunking_config(&self) -> Result<(), ConfigError> {
        let config = &self.chunking;

        if !(100..=8192).contains(&config.max_chunk_size) {
            return Err(ConfigError::InvalidMaxChunkSize(config.max_chunk_size));
        }

        if config.min_chunk_size >= config.max_chunk_size {
            return Err(ConfigError::MinChunkSizeTooLarge(
                config.min_chunk_size,
                config.max_chunk_size,
            ));
        }

        if config.overlap_size >= config.min_chunk_size {
            return Err(ConfigError::OverlapTooLarge(
                config.overlap_size,
                config.min_chunk_size,
            ));
        }

        Ok(())
    }

    fn validate_memory_config(&self) -> Result<(), ConfigError> {
        let memory = &self.memory;

        if memory.chunk_threshold == 0 {
            return Err(ConfigError::InvalidChunkThreshold(memory.chunk_threshold));
        }

        if !(1..=100).contains(&memory.default_limit) {
            return Err(ConfigError::InvalidDefaultLimit(memory.default_limit));
        }

        if !(0.0..=1.0).contains(&memory.default_threshold) {
            return Err(ConfigError::InvalidDefaultThreshold(
                memory.default_threshold,
            ));
        }

        Ok(())
    }

    fn validate_context_config(&self) -> Result<(), ConfigError> {
        let context = &self.context;

        if context.max_tokens == 0 {
            return Err(ConfigError::InvalidMaxTokens(context.max_tokens));
        }

        if context.reserve_tokens >= context.max_tokens {
            return Err(ConfigError::ReserveTooLarge(
                context.reserve_tokens,
                context.max_tokens,
            ));
        }

        Ok(())
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join(CONFIG_FILE_NAME)
    }

    /// Get the path for the SQLite database
    #[inline]
    pub fn database_path(&self) -> PathBuf {
        self.get_base_dir().join(&self.store.database_file)
    }

    /// Get the path of the encryption key file, kept beside the database
    #[inline]
    pub fn key_path(&self) -> PathBuf {
        self.get_base_dir().join(KEY_FILE_NAME)
    }

    #[inline]
    pub fn set_max_tokens(&mut self, max_tokens: usize) -> Result<(), ConfigError> {
        if max_tokens == 0 {
            return Err(ConfigError::InvalidMaxTokens(max_tokens));
        }
        if self.context.reserve_tokens >= max_tokens {
            return Err(ConfigError::ReserveTooLarge(
                self.context.reserve_tokens,
                max_tokens,
            ));
        }
        self.context.max_tokens = max_tokens;
        Ok(())
    }

    #[inline]
    pub fn set_reserve_tokens(&mut self, reserve_tokens: usize) -> Result<(), ConfigError> {
        if reserve_tokens >= self.context.max_tokens {
            return Err(ConfigError::ReserveTooLarge(
                reserve_tokens,
                self.context.max_tokens,
            ));
        }
        self.context.reserve_tokens = reserve_tokens;
        Ok(())
    }
}

impl StoreConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=1_000_000).contains(&self.max_embeddings) {
            return Err(ConfigError::InvalidMaxEmbeddings(self.max_embeddings));
        }

        if self.max_age_days > 3650 {
            return Err(ConfigError::InvalidMaxAge(self.max_age_days));
        }

        if self.database_file.trim().is_empty() {
            return Err(ConfigError::InvalidDatabaseFile(self.database_file.clone()));
        }

        Ok(())
    }

    /// The runtime settings for a [`crate::store::VectorStore`]
    #[inline]
    pub const fn store_settings(&self) -> StoreSettings {
        StoreSettings {
            max_embeddings: self.max_embeddings,
            max_age_days: self.max_age_days,
            compress_vectors: self.compress_vectors,
        }
    }

    #[inline]
    pub fn set_max_embeddings(&mut self, max_embeddings: usize) -> Result<(), ConfigError> {
        if !(1..=1_000_000).contains(&max_embeddings) {
            return Err(ConfigError::InvalidMaxEmbeddings(max_embeddings));
        }
        self.max_embeddings = max_embeddings;
        Ok(())
    }

    #[inline]
    pub fn set_max_age_days(&mut self, days: u32) -> Result<(), ConfigError> {
        if days > 3650 {
            return Err(ConfigError::InvalidMaxAge(days));
        }
        self.max_age_days = days;
        Ok(())
    }
}

impl EmbeddingsConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.local_dimension != LOCAL_DIMENSION {
            return Err(ConfigError::InvalidLocalDimension(self.local_dimension));
        }

        if let Some(remote) = &self.remote {
            remote.validate()?;
        }

        Ok(())
    }
}

impl RemoteEmbeddingConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.endpoint_url()?;

        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if self.api_key_env.trim().is_empty() {
            return Err(ConfigError::InvalidApiKeyEnv(self.api_key_env.clone()));
        }

        if !(1..=300).contains(&self.timeout_seconds) {
            return Err(ConfigError::InvalidTimeout(self.timeout_seconds));
        }

        if !(1..=10).contains(&self.retry_attempts) {
            return Err(ConfigError::InvalidRetryAttempts(self.retry_attempts));
        }

        Ok(())
    }

    #[inline]
    pub fn endpoint_url(&self) -> Result<Url, ConfigError> {
        let url =
            Url::parse(&self.endpoint).map_err(|_| ConfigError::InvalidUrl(self.endpoint.clone()))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidProtocol(url.scheme().to_string()));
        }
        if url.host_str().is_none() {
            return Err(ConfigError::InvalidUrl(self.endpoint.clone()));
        }
        Ok(url)
    }

    #[inline]
    pub fn set_endpoint(&mut self, endpoint: String) -> Result<(), ConfigError> {
        let temp_config = RemoteEmbeddingConfig {
            endpoint: endpoint.clone(),
            ..self.clone()
        };
        temp_config.endpoint_url()?;
        self.endpoint = endpoint;
        Ok(())
    }

    #[inline]
    pub fn set_model(&mut self, model: String) -> Result<(), ConfigError> {
        if model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(model));
        }
        self.model = model;
        Ok(())
    }

    #[inline]
    pub fn set_api_key_env(&mut self, name: String) -> Result<(), ConfigError> {
        if name.trim().is_empty() {
            return Err(ConfigError::InvalidApiKeyEnv(name));
        }
        self.api_key_env = name;
        Ok(())
    }

    #[inline]
    pub fn set_timeout_seconds(&mut self, seconds: u64) -> Result<(), ConfigError> {
        if !(1..=300).contains(&seconds) {
            return Err(ConfigError::InvalidTimeout(seconds));
        }
        self.timeout_seconds = seconds;
        Ok(())
    }

    #[inline]
    pub fn set_retry_attempts(&mut self, attempts: u32) -> Result<(), ConfigError> {
        if !(1..=10).contains(&attempts) {
            return Err(ConfigError::InvalidRetryAttempts(attempts));
        }
        self.retry_attempts = attempts;
        Ok(())
    }
}
