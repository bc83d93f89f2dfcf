use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{EmbeddingError, EmbeddingProvider};

/// A locally loaded model able to produce embeddings
///
/// Implementations report a missing model as [`EmbeddingError::NotInitialized`] or with
/// an inference message such as "model not loaded"; both count as recoverable.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    fn is_loaded(&self) -> bool;

    fn model_name(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// Adapts an [`InferenceEngine`] to the [`EmbeddingProvider`] interface
pub struct OnDeviceProvider<E: ?Sized> {
    engine: Arc<E>,
}

impl<E: InferenceEngine + ?Sized> OnDeviceProvider<E> {
    #[inline]
    pub fn new(engine: Arc<E>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl<E: InferenceEngine + ?Sized> EmbeddingProvider for OnDeviceProvider<E> {
    fn name(&self) -> &str {
        self.engine.model_name()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if !self.engine.is_loaded() {
            return Err(EmbeddingError::NotInitialized);
        }
        let vector = self.engine.embed(text).await?;
        debug!(
            "On-device model {} produced {} dimensions",
            self.engine.model_name(),
            vector.len()
        );
        Ok(vector)
    }
}
