/// Embedding and generation client seam.
///
/// [`ollama::OllamaClient`] talks to a local Ollama daemon;
/// [`mock::MockEmbedder`] is a deterministic stand-in for tests.
pub mod mock;
pub mod ollama;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors that can occur during embedding or generation.
#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("embedding service request failed: {0}")]
    Service(String),

    #[error("expected exactly one embedding, got {0}")]
    UnexpectedEmbeddingCount(usize),

    #[error("invalid OLLAMA_HOST {0:?}")]
    InvalidHost(String),

    #[error("writing generated token: {0}")]
    Sink(#[source] std::io::Error),

    #[error("request cancelled")]
    Cancelled,
}

/// A generation call: `prompt` under a fixed `system` prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub system: String,
    /// Deliver tokens as they arrive instead of one final response.
    pub stream: bool,
}

/// Receives generated text, one token (or one whole response) at a time.
pub type TokenSink<'a> = dyn FnMut(&str) -> std::io::Result<()> + Send + 'a;

/// Client for an embedding + generation service.
///
/// Implementations must be `Send + Sync` to allow concurrent use
/// behind `Arc`.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed `input` with `model`, returning exactly one vector.
    async fn embed(
        &self,
        cancel: &CancellationToken,
        model: &str,
        input: &str,
    ) -> Result<Vec<f32>, EmbedderError>;

    /// Run a generation, passing response text to `on_token`.
    async fn generate(
        &self,
        cancel: &CancellationToken,
        request: &GenerateRequest,
        on_token: &mut TokenSink<'_>,
    ) -> Result<(), EmbedderError>;
}
