use std::sync::atomic::AtomicUsize;

use super::*;
use crate::embeddings::{InferenceEngine, LOCAL_DIMENSION, OnDeviceProvider};
use crate::math::magnitude;

struct FixedProvider {
    name: &'static str,
    outcome: Result<Vec<f32>, EmbeddingError>,
    calls: AtomicUsize,
}

impl FixedProvider {
    fn new(name: &'static str, outcome: Result<Vec<f32>, EmbeddingError>) -> Arc<Self> {
        Arc::new(Self {
            name,
            outcome,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for FixedProvider {
    fn name(&self) -> &str {
        self.name
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcome.clone()
    }
}

struct UnloadedEngine;

#[async_trait]
impl InferenceEngine for UnloadedEngine {
    fn is_loaded(&self) -> bool {
        false
    }

    fn model_name(&self) -> &str {
        "unloaded"
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::Inference("should not be called".to_string()))
    }
}

#[tokio::test]
async fn local_only_chain_uses_fallback() {
    let chain = EmbeddingChain::new();
    assert_eq!(chain.active_tier(), None);

    let vector = chain.embed("Paris is lovely").await.expect("should embed");
    assert_eq!(vector.len(), LOCAL_DIMENSION);
    assert_eq!(chain.active_tier(), Some(EmbeddingTier::Local));
    assert_eq!(chain.session_dimension(), Some(LOCAL_DIMENSION));
}

#[tokio::test]
async fn on_device_answers_first() {
    let device = FixedProvider::new("device", Ok(vec![0.6, 0.8]));
    let remote = FixedProvider::new("remote", Ok(vec![1.0, 0.0]));
    let chain = EmbeddingChain::new()
        .with_on_device(Arc::clone(&device) as Arc<dyn EmbeddingProvider>)
        .with_remote(Arc::clone(&remote) as Arc<dyn EmbeddingProvider>);

    let vector = chain.embed("hello").await.expect("should embed");
    assert_eq!(vector, vec![0.6, 0.8]);
    assert_eq!(chain.active_tier(), Some(EmbeddingTier::OnDevice));
    assert_eq!(remote.calls(), 0);
}

#[tokio::test]
async fn unloaded_model_falls_through_to_remote() {
    let remote = FixedProvider::new("remote", Ok(vec![0.0, 1.0, 0.0]));
    let chain = EmbeddingChain::new()
        .with_on_device(Arc::new(OnDeviceProvider::new(Arc::new(UnloadedEngine))))
        .with_remote(Arc::clone(&remote) as Arc<dyn EmbeddingProvider>);

    for _ in 0..3 {
        let vector = chain.embed("hello").await.expect("should embed");
        assert_eq!(vector, vec![0.0, 1.0, 0.0]);
    }
    assert_eq!(chain.active_tier(), Some(EmbeddingTier::Remote));
    assert_eq!(remote.calls(), 3);
    assert_eq!(chain.reported.lock().expect("lock").len(), 1);
}

#[tokio::test]
async fn recoverable_inference_message_falls_through() {
    let device = FixedProvider::new(
        "device",
        Err(EmbeddingError::Inference("Model not loaded".to_string())),
    );
    let chain = EmbeddingChain::new().with_on_device(device);

    let vector = chain.embed("hello world").await.expect("should embed");
    assert_eq!(vector.len(), LOCAL_DIMENSION);
    assert_eq!(chain.active_tier(), Some(EmbeddingTier::Local));
}

#[tokio::test]
async fn unrecoverable_on_device_error_propagates() {
    let device = FixedProvider::new(
        "device",
        Err(EmbeddingError::Inference("tokenizer exploded".to_string())),
    );
    let remote = FixedProvider::new("remote", Ok(vec![1.0]));
    let chain = EmbeddingChain::new()
        .with_on_device(device)
        .with_remote(Arc::clone(&remote) as Arc<dyn EmbeddingProvider>);

    let error = chain.embed("hello").await.expect_err("should fail");
    assert_eq!(error, EmbeddingError::Inference("tokenizer exploded".to_string()));
    assert_eq!(remote.calls(), 0);
    assert_eq!(chain.active_tier(), None);
}

#[tokio::test]
async fn any_remote_failure_falls_through_to_local() {
    let remote = FixedProvider::new(
        "remote",
        Err(EmbeddingError::Http {
            status: 401,
            body: "bad key".to_string(),
        }),
    );
    let chain = EmbeddingChain::new().with_remote(remote);

    let vector = chain.embed("hello world").await.expect("should embed");
    assert_eq!(vector.len(), LOCAL_DIMENSION);
    assert_eq!(chain.active_tier(), Some(EmbeddingTier::Local));
}

#[tokio::test]
async fn later_vectors_are_reconciled_to_first_dimension() {
    let device = FixedProvider::new("device", Ok(vec![3.0, 4.0]));
    let chain = EmbeddingChain::new().with_on_device(device);
    assert_eq!(chain.embed("a").await.expect("should embed").len(), 2);

    let chain = EmbeddingChain {
        on_device: None,
        ..chain
    };
    let vector = chain.embed("tower bridge").await.expect("should embed");
    assert_eq!(vector.len(), 2);
    assert_eq!(chain.active_tier(), Some(EmbeddingTier::Local));
}

#[tokio::test]
async fn batch_embeds_every_text() {
    let chain = EmbeddingChain::new();
    let vectors = chain
        .embed_batch(&["alpha".to_string(), "beta".to_string()])
        .await
        .expect("should embed");
    assert_eq!(vectors.len(), 2);
    assert_ne!(vectors[0], vectors[1]);
}

#[test]
fn reconciler_pads_and_truncates() {
    let reconciler = DimensionReconciler::new();
    assert_eq!(reconciler.target(), None);
    assert_eq!(reconciler.reconcile(Vec::new()), Vec::<f32>::new());
    assert_eq!(reconciler.reconcile(vec![0.0, 0.0, 1.0]), vec![0.0, 0.0, 1.0]);
    assert_eq!(reconciler.target(), Some(3));

    let padded = reconciler.reconcile(vec![3.0, 4.0]);
    assert_eq!(padded.len(), 3);
    assert!((padded[0] - 0.6).abs() < 1e-6);
    assert!((padded[1] - 0.8).abs() < 1e-6);
    assert_eq!(padded[2], 0.0);

    let truncated = reconciler.reconcile(vec![1.0, 1.0, 1.0, 5.0]);
    assert_eq!(truncated.len(), 3);
    assert!((magnitude(&truncated) - 1.0).abs() < 1e-6);
}
