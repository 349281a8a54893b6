/// Mock embedder for testing purposes.
///
/// Generates deterministic embeddings based on text hash and replays a
/// scripted token sequence for generation.
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{Embedder, EmbedderError, GenerateRequest, TokenSink};

/// A mock embedder that produces deterministic vectors from text hashes.
///
/// Useful for testing without a running Ollama daemon.
pub struct MockEmbedder {
    pub dimensions: usize,
    fixed: Option<Vec<f32>>,
    tokens: Vec<String>,
    token_delay: Duration,
    embed_calls: AtomicUsize,
    requests: Mutex<Vec<GenerateRequest>>,
}

impl MockEmbedder {
    /// Create a new `MockEmbedder` with the given dimensionality.
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            fixed: None,
            tokens: Vec::new(),
            token_delay: Duration::ZERO,
            embed_calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Return `vector` for every input instead of a hash-derived one.
    #[must_use]
    pub fn with_fixed_vector(mut self, vector: Vec<f32>) -> Self {
        self.dimensions = vector.len();
        self.fixed = Some(vector);
        self
    }

    /// Tokens replayed by `generate`, with `delay` before each one.
    #[must_use]
    pub fn with_tokens<I, S>(mut self, tokens: I, delay: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tokens = tokens.into_iter().map(Into::into).collect();
        self.token_delay = delay;
        self
    }

    pub fn embed_calls(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }

    /// Generation requests seen so far.
    pub fn requests(&self) -> Vec<GenerateRequest> {
        self.requests
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn hash_vector(&self, text: &str) -> Vec<f32> {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let bytes = hasher.finish().to_le_bytes();

        let mut embedding: Vec<f32> = (0..self.dimensions)
            .map(|i| f32::from(bytes[i % 8]) / 255.0)
            .collect();

        // L2 normalize
        let norm_sq: f32 = embedding.iter().map(|v| v * v).sum();
        if norm_sq > 0.0 {
            let inv = 1.0 / norm_sq.sqrt();
            for v in &mut embedding {
                *v *= inv;
            }
        }
        embedding
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new(768)
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(
        &self,
        cancel: &CancellationToken,
        _model: &str,
        input: &str,
    ) -> Result<Vec<f32>, EmbedderError> {
        if cancel.is_cancelled() {
            return Err(EmbedderError::Cancelled);
        }
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        Ok(match &self.fixed {
            Some(v) => v.clone(),
            None => self.hash_vector(input),
        })
    }

    async fn generate(
        &self,
        cancel: &CancellationToken,
        request: &GenerateRequest,
        on_token: &mut TokenSink<'_>,
    ) -> Result<(), EmbedderError> {
        self.requests
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(request.clone());

        if !request.stream {
            if cancel.is_cancelled() {
                return Err(EmbedderError::Cancelled);
            }
            return on_token(&self.tokens.concat()).map_err(EmbedderError::Sink);
        }

        for token in &self.tokens {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(EmbedderError::Cancelled),
                _ = tokio::time::sleep(self.token_delay) => {}
            }
            on_token(token).map_err(EmbedderError::Sink)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(stream: bool) -> GenerateRequest {
        GenerateRequest {
            model: "m".into(),
            prompt: "p".into(),
            system: "s".into(),
            stream,
        }
    }

    #[tokio::test]
    async fn test_mock_embed_dimensions() {
        let embedder = MockEmbedder::new(384);
        let cancel = CancellationToken::new();
        let result = embedder.embed(&cancel, "m", "hello world").await.unwrap();
        assert_eq!(result.len(), 384);
        assert_eq!(embedder.embed_calls(), 1);
    }

    #[tokio::test]
    async fn test_mock_embed_deterministic() {
        let embedder = MockEmbedder::default();
        let cancel = CancellationToken::new();
        let a = embedder.embed(&cancel, "m", "hello").await.unwrap();
        let b = embedder.embed(&cancel, "m", "hello").await.unwrap();
        let c = embedder.embed(&cancel, "m", "world").await.unwrap();
        assert_eq!(a, b, "same input should produce same output");
        assert_ne!(a, c, "different inputs should produce different outputs");
    }

    #[tokio::test]
    async fn test_mock_embed_normalized() {
        let embedder = MockEmbedder::new(64);
        let vec = embedder
            .embed(&CancellationToken::new(), "m", "test normalization")
            .await
            .unwrap();
        let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!(
            (norm - 1.0).abs() < 0.01,
            "vector should be approximately unit length, got {norm}"
        );
    }

    #[tokio::test]
    async fn test_fixed_vector() {
        let embedder = MockEmbedder::default().with_fixed_vector(vec![1.0, 0.0]);
        let v = embedder
            .embed(&CancellationToken::new(), "m", "anything")
            .await
            .unwrap();
        assert_eq!(v, vec![1.0, 0.0]);
        assert_eq!(embedder.dimensions, 2);
    }

    #[tokio::test]
    async fn test_generate_replays_tokens() {
        let embedder = MockEmbedder::default().with_tokens(["a", "b"], Duration::ZERO);
        let mut out = Vec::new();
        embedder
            .generate(&CancellationToken::new(), &request(true), &mut |t: &str| -> std::io::Result<()> {
                out.push(t.to_string());
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(out, vec!["a", "b"]);
        assert_eq!(embedder.requests(), vec![request(true)]);
    }

    #[tokio::test]
    async fn test_generate_non_streaming_is_one_call() {
        let embedder = MockEmbedder::default().with_tokens(["a", "b"], Duration::ZERO);
        let mut out = Vec::new();
        embedder
            .generate(&CancellationToken::new(), &request(false), &mut |t: &str| -> std::io::Result<()> {
                out.push(t.to_string());
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(out, vec!["ab"]);
    }
}
