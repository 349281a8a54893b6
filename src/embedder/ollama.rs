/// Ollama client for `/api/embed` and `/api/generate`, built on `ollama-rs`.
use std::fmt;

use async_trait::async_trait;
use futures::StreamExt;
use ollama_rs::Ollama;
use ollama_rs::generation::completion::request::GenerationRequest;
use ollama_rs::generation::embeddings::request::{EmbeddingsInput, GenerateEmbeddingsRequest};
use reqwest::Url;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{Embedder, EmbedderError, GenerateRequest, TokenSink};

const DEFAULT_PORT: u16 = 11434;

/// Where the Ollama daemon listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OllamaEndpoint {
    /// Scheme and host, e.g. `http://127.0.0.1`.
    pub host: String,
    pub port: u16,
}

impl Default for OllamaEndpoint {
    fn default() -> Self {
        Self {
            host: "http://127.0.0.1".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl fmt::Display for OllamaEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Resolve an `OLLAMA_HOST` value into host and port.
///
/// The scheme is optional (default `http`). Without a port, `11434` is used,
/// or 80/443 when the scheme was given explicitly. An empty host means
/// `127.0.0.1`. Ports must be numeric and paths are not supported.
pub fn parse_ollama_host(raw: Option<&str>) -> Result<OllamaEndpoint, EmbedderError> {
    let raw = raw.map(str::trim).unwrap_or_default();
    let invalid = || EmbedderError::InvalidHost(raw.to_string());

    let (scheme, rest, default_port) = match raw.split_once("://") {
        None => ("http", raw, DEFAULT_PORT),
        Some(("http", rest)) => ("http", rest, 80),
        Some(("https", rest)) => ("https", rest, 443),
        Some(_) => return Err(invalid()),
    };
    let (hostport, path) = rest.split_once('/').unwrap_or((rest, ""));
    if !path.trim_matches('/').is_empty() {
        return Err(invalid());
    }

    let (host, port) = split_host_port(hostport);
    let host = match host {
        "" => "127.0.0.1".to_string(),
        h if h.contains(':') => format!("[{h}]"),
        h => h.to_string(),
    };
    let port = match port {
        None | Some("") => default_port,
        Some(p) => p.parse::<u16>().map_err(|_| invalid())?,
    };

    let host = format!("{scheme}://{host}");
    Url::parse(&format!("{host}:{port}/")).map_err(|_| invalid())?;
    Ok(OllamaEndpoint { host, port })
}

fn split_host_port(hostport: &str) -> (&str, Option<&str>) {
    if let Some(rest) = hostport.strip_prefix('[') {
        if let Some((host, tail)) = rest.split_once(']') {
            return (host, tail.strip_prefix(':'));
        }
    }
    match hostport.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => (host, Some(port)),
        _ => (hostport, None),
    }
}

fn service_error(e: impl fmt::Display) -> EmbedderError {
    EmbedderError::Service(e.to_string())
}

/// Ollama daemon client. Cheap to clone; safe for concurrent use.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: Ollama,
    endpoint: OllamaEndpoint,
}

impl OllamaClient {
    #[must_use]
    pub fn new(endpoint: OllamaEndpoint) -> Self {
        Self {
            client: Ollama::new(endpoint.host.clone(), endpoint.port),
            endpoint,
        }
    }

    pub fn endpoint(&self) -> &OllamaEndpoint {
        &self.endpoint
    }
}

#[async_trait]
impl Embedder for OllamaClient {
    async fn embed(
        &self,
        cancel: &CancellationToken,
        model: &str,
        input: &str,
    ) -> Result<Vec<f32>, EmbedderError> {
        let request = GenerateEmbeddingsRequest::new(model.to_string(), EmbeddingsInput::from(input));
        debug!(model, chars = input.len(), "requesting embedding");

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EmbedderError::Cancelled),
            res = self.client.generate_embeddings(request) => res.map_err(service_error)?,
        };

        let mut embeddings = response.embeddings;
        if embeddings.len() != 1 {
            return Err(EmbedderError::UnexpectedEmbeddingCount(embeddings.len()));
        }
        Ok(embeddings.remove(0))
    }

    async fn generate(
        &self,
        cancel: &CancellationToken,
        request: &GenerateRequest,
        on_token: &mut TokenSink<'_>,
    ) -> Result<(), EmbedderError> {
        let generation = GenerationRequest::new(request.model.clone(), request.prompt.clone())
            .system(request.system.clone());
        debug!(model = %request.model, stream = request.stream, "requesting generation");

        if !request.stream {
            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(EmbedderError::Cancelled),
                res = self.client.generate(generation) => res.map_err(service_error)?,
            };
            if !response.response.is_empty() {
                on_token(&response.response).map_err(EmbedderError::Sink)?;
            }
            return Ok(());
        }

        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EmbedderError::Cancelled),
            res = self.client.generate_stream(generation) => res.map_err(service_error)?,
        };
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(EmbedderError::Cancelled),
                next = stream.next() => next,
            };
            let Some(batch) = next else {
                return Ok(());
            };
            let responses =
                batch.map_err(|_| EmbedderError::Service("generation stream failed".to_string()))?;
            for response in responses {
                if !response.response.is_empty() {
                    on_token(&response.response).map_err(EmbedderError::Sink)?;
                }
                if response.done {
                    return Ok(());
                }
            }
        }
    }
}
