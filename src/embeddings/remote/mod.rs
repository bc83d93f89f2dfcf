#[cfg(test)]
mod tests;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};
use url::Url;

use super::{EmbeddingError, EmbeddingProvider};
use crate::config::RemoteEmbeddingConfig;

const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const EXPONENTIAL_BACKOFF_BASE: u32 = 2;
const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);
const MAX_ERROR_BODY: usize = 512;

/// Client for an HTTPS embedding API speaking the `{input, model}` -> `{data: [{embedding}]}`
/// protocol
#[derive(Debug, Clone)]
pub struct RemoteEmbeddingClient {
    endpoint: Url,
    model: String,
    api_key: Option<String>,
    agent: ureq::Agent,
    retry_attempts: u32,
    backoff: Duration,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a, I: Serialize> {
    input: I,
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .http_status_as_error(false)
        .build()
        .into()
}

impl RemoteEmbeddingClient {
    #[inline]
    pub fn new(endpoint: &str, model: &str) -> Result<Self, EmbeddingError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| EmbeddingError::InvalidEndpoint(format!("{endpoint}: {e}")))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(EmbeddingError::InvalidEndpoint(format!(
                "unsupported scheme '{}'",
                endpoint.scheme()
            )));
        }

        Ok(Self {
            endpoint,
            model: model.to_string(),
            api_key: None,
            agent: build_agent(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS)),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
        })
    }

    /// Build a client from configuration, reading the API key from the configured
    /// environment variable
    #[inline]
    pub fn from_config(config: &RemoteEmbeddingConfig) -> Result<Self, EmbeddingError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty());
        if api_key.is_none() {
            debug!("Environment variable {} is not set", config.api_key_env);
            return Err(EmbeddingError::NotConfigured);
        }

        let mut client = Self::new(&config.endpoint, &config.model)?
            .with_timeout(Duration::from_secs(config.timeout_seconds))
            .with_retry_attempts(config.retry_attempts);
        client.api_key = api_key;
        Ok(client)
    }

    #[inline]
    pub fn with_api_key<S: Into<String>>(mut self, key: S) -> Self {
        self.api_key = Some(key.into());
        self
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = build_agent(timeout);
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    /// Delay before the first retry; doubles on every further attempt
    #[inline]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    #[inline]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Embed one text, blocking the current thread
    #[inline]
    pub fn embed_blocking(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        debug!("Requesting remote embedding (length: {})", text.len());
        let mut vectors = self.request(
            &EmbedRequest {
                input: text,
                model: &self.model,
            },
            1,
        )?;
        vectors.pop().ok_or_else(|| {
            EmbeddingError::InvalidResponse("response contained no embeddings".to_string())
        })
    }

    /// Embed several texts in one request, blocking the current thread
    #[inline]
    pub fn embed_batch_blocking(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!("Requesting remote embeddings for {} texts", texts.len());
        self.request(
            &EmbedRequest {
                input: texts,
                model: &self.model,
            },
            texts.len(),
        )
    }

    fn request<I: Serialize>(
        &self,
        request: &EmbedRequest<'_, I>,
        expected: usize,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let body = serde_json::to_string(request)
            .map_err(|e| EmbeddingError::InvalidResponse(format!("failed to encode request: {e}")))?;
        let response_text = self.post_with_retry(&body)?;

        let response: EmbedResponse = serde_json::from_str(&response_text)
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;
        if response.data.len() != expected {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected {} embeddings, received {}",
                expected,
                response.data.len()
            )));
        }

        let mut data = response.data;
        if data.iter().all(|d| d.index.is_some()) {
            data.sort_by_key(|d| d.index);
        }
        if data.iter().any(|d| d.embedding.is_empty()) {
            return Err(EmbeddingError::InvalidResponse(
                "response contained an empty embedding".to_string(),
            ));
        }

        debug!(
            "Received {} embeddings with {} dimensions",
            data.len(),
            data.first().map_or(0, |d| d.embedding.len())
        );
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }

    fn post_once(&self, body: &str) -> Result<String, EmbeddingError> {
        let mut request = self
            .agent
            .post(self.endpoint.as_str())
            .header("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let mut response = request
            .send(body)
            .map_err(|e| EmbeddingError::Network(e.to_string()))?;
        let status = response.status().as_u16();
        let text = response
            .body_mut()
            .read_to_string()
            .map_err(|e| EmbeddingError::Network(e.to_string()))?;

        if (200..300).contains(&status) {
            Ok(text)
        } else {
            let body = text.chars().take(MAX_ERROR_BODY).collect();
            Err(EmbeddingError::Http { status, body })
        }
    }

    fn post_with_retry(&self, body: &str) -> Result<String, EmbeddingError> {
        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            debug!("HTTP request attempt {}/{}", attempt, self.retry_attempts);

            match self.post_once(body) {
                Ok(text) => {
                    debug!("Request succeeded on attempt {}", attempt);
                    return Ok(text);
                }
                Err(error) if error.is_recoverable() => {
                    warn!(
                        "Embedding request failed: {}, attempt {}/{}",
                        error, attempt, self.retry_attempts
                    );
                    last_error = Some(error);

                    if attempt < self.retry_attempts {
                        let delay = self.backoff * EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1);
                        debug!("Waiting {:?} before retry", delay);
                        std::thread::sleep(delay);
                    }
                }
                Err(error) => {
                    warn!("Embedding request failed, not retrying: {}", error);
                    return Err(error);
                }
            }
        }

        error!("All retry attempts failed for request to {}", self.endpoint);
        Err(last_error.unwrap_or_else(|| {
            EmbeddingError::Network("request failed after retries".to_string())
        }))
    }
}

#[async_trait]
impl EmbeddingProvider for RemoteEmbeddingClient {
    fn name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let client = self.clone();
        let text = text.to_string();
        tokio::task::spawn_blocking(move || client.embed_blocking(&text))
            .await
            .map_err(|e| EmbeddingError::Network(format!("embedding task failed: {e}")))?
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let client = self.clone();
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || client.embed_batch_blocking(&texts))
            .await
            .map_err(|e| EmbeddingError::Network(format!("embedding task failed: {e}")))?
    }
}
