#[cfg(test)]
mod tests;

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{EmbeddingError, EmbeddingProvider, LocalEmbedder};
use crate::math;

/// Which provider answered a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EmbeddingTier {
    OnDevice,
    Remote,
    Local,
}

impl EmbeddingTier {
    const fn code(self) -> u8 {
        match self {
            Self::OnDevice => 1,
            Self::Remote => 2,
            Self::Local => 3,
        }
    }

    const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::OnDevice),
            2 => Some(Self::Remote),
            3 => Some(Self::Local),
            _ => None,
        }
    }
}

impl fmt::Display for EmbeddingTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::OnDevice => "on-device",
            Self::Remote => "remote",
            Self::Local => "local",
        })
    }
}

/// Keeps every vector of a session at the length of the first one observed
///
/// Shorter vectors are zero-padded and longer ones truncated, then re-normalized. This
/// is an approximation: it keeps vectors comparable in length, not in meaning, when two
/// providers with different models answer in the same session.
#[derive(Debug, Default)]
pub struct DimensionReconciler {
    target: OnceLock<usize>,
    reported: Mutex<HashSet<usize>>,
}

impl DimensionReconciler {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// The session dimension, once a vector has been seen
    #[inline]
    pub fn target(&self) -> Option<usize> {
        self.target.get().copied()
    }

    #[inline]
    pub fn reconcile(&self, mut vector: Vec<f32>) -> Vec<f32> {
        if vector.is_empty() {
            return vector;
        }
        let target = *self.target.get_or_init(|| {
            debug!("Embedding dimension for this session is {}", vector.len());
            vector.len()
        });
        if vector.len() == target {
            return vector;
        }

        let first_time = self
            .reported
            .lock()
            .map(|mut seen| seen.insert(vector.len()))
            .unwrap_or(false);
        if first_time {
            warn!(
                "Reconciling {}-dimensional embeddings to the session dimension {}",
                vector.len(),
                target
            );
        }

        vector.resize(target, 0.0);
        math::normalize_in_place(&mut vector);
        vector
    }
}

/// On-device model first, then a remote API, then the local hashing embedder
///
/// Recoverable on-device failures fall through to the next tier; anything else is
/// returned to the caller. Remote failures of any kind fall through, and the local tier
/// cannot fail. Each distinct fallback condition is logged once.
pub struct EmbeddingChain {
    on_device: Option<Arc<dyn EmbeddingProvider>>,
    remote: Option<Arc<dyn EmbeddingProvider>>,
    local: LocalEmbedder,
    reconciler: DimensionReconciler,
    active: AtomicU8,
    reported: Mutex<HashSet<(EmbeddingTier, &'static str)>>,
}

impl fmt::Debug for EmbeddingChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddingChain")
            .field("on_device", &self.on_device.as_ref().map(|p| p.name().to_string()))
            .field("remote", &self.remote.as_ref().map(|p| p.name().to_string()))
            .field("active", &self.active_tier())
            .finish_non_exhaustive()
    }
}

impl Default for EmbeddingChain {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddingChain {
    /// A chain with only the local tier
    #[inline]
    pub fn new() -> Self {
        Self {
            on_device: None,
            remote: None,
            local: LocalEmbedder::new(),
            reconciler: DimensionReconciler::new(),
            active: AtomicU8::new(0),
            reported: Mutex::new(HashSet::new()),
        }
    }

    #[inline]
    pub fn with_on_device(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.on_device = Some(provider);
        self
    }

    #[inline]
    pub fn with_remote(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.remote = Some(provider);
        self
    }

    /// The tier that answered the most recent request
    #[inline]
    pub fn active_tier(&self) -> Option<EmbeddingTier> {
        EmbeddingTier::from_code(self.active.load(Ordering::Acquire))
    }

    #[inline]
    pub fn session_dimension(&self) -> Option<usize> {
        self.reconciler.target()
    }

    async fn resolve(&self, text: &str) -> Result<(EmbeddingTier, Vec<f32>), EmbeddingError> {
        if let Some(provider) = &self.on_device {
            match provider.embed(text).await {
                Ok(vector) if !vector.is_empty() => return Ok((EmbeddingTier::OnDevice, vector)),
                Ok(_) => self.note_fallback(
                    EmbeddingTier::OnDevice,
                    &EmbeddingError::InvalidResponse("empty vector".to_string()),
                ),
                Err(error) if error.is_recoverable() => {
                    self.note_fallback(EmbeddingTier::OnDevice, &error);
                }
                Err(error) => return Err(error),
            }
        }

        if let Some(provider) = &self.remote {
            match provider.embed(text).await {
                Ok(vector) if !vector.is_empty() => return Ok((EmbeddingTier::Remote, vector)),
                Ok(_) => self.note_fallback(
                    EmbeddingTier::Remote,
                    &EmbeddingError::InvalidResponse("empty vector".to_string()),
                ),
                Err(error) => self.note_fallback(EmbeddingTier::Remote, &error),
            }
        }

        Ok((EmbeddingTier::Local, self.local.embed_text(text)))
    }

    fn note_fallback(&self, tier: EmbeddingTier, error: &EmbeddingError) {
        let first_time = self
            .reported
            .lock()
            .map(|mut seen| seen.insert((tier, error.kind())))
            .unwrap_or(false);
        if first_time {
            warn!("{} embeddings unavailable, falling back: {}", tier, error);
        } else {
            debug!("{} embeddings unavailable: {}", tier, error);
        }
    }

    fn record_tier(&self, tier: EmbeddingTier) {
        let previous = self.active.swap(tier.code(), Ordering::AcqRel);
        if previous != tier.code() {
            info!("Embedding requests are now served by the {} tier", tier);
        }
    }
}

#[async_trait]
impl EmbeddingProvider for EmbeddingChain {
    fn name(&self) -> &str {
        "chain"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let (tier, vector) = self.resolve(text).await?;
        self.record_tier(tier);
        Ok(self.reconciler.reconcile(vector))
    }
}
