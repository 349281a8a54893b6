/// MCP server setup using `rmcp` over streamable HTTP.
///
/// Each session gets its own [`SearchServer`] handle; all of them share one
/// [`Retriever`] and therefore one database pool and HTTP client.
use std::sync::Arc;

use anyhow::{Context, Result};
use rmcp::transport::streamable_http_server::{
    StreamableHttpServerConfig, StreamableHttpService, session::local::LocalSessionManager,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::mcp::tools::SearchServer;
use crate::retriever::Retriever;

/// Path clients are pointed at. The service answers on every path, so
/// clients configured with the bare server URL keep working.
pub const MCP_PATH: &str = "/mcp";

pub struct McpServer {
    retriever: Arc<Retriever>,
}

impl McpServer {
    pub fn new(retriever: Arc<Retriever>) -> Self {
        Self { retriever }
    }

    /// Axum router serving MCP on every path, [`MCP_PATH`] included.
    pub fn router(&self, cancel: &CancellationToken) -> axum::Router {
        let retriever = self.retriever.clone();
        let service = StreamableHttpService::new(
            move || Ok(SearchServer::new(retriever.clone())),
            LocalSessionManager::default().into(),
            StreamableHttpServerConfig {
                cancellation_token: cancel.child_token(),
                ..Default::default()
            },
        );
        axum::Router::new().fallback_service(service)
    }

    /// Bind `addr` and serve until `cancel` fires.
    pub async fn serve(self, addr: &str, cancel: CancellationToken) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        let local = listener.local_addr()?;
        info!(addr = %local, path = MCP_PATH, "MCP server listening");

        let app = self.router(&cancel);
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
            .context("MCP server encountered an error")?;

        info!("MCP server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::embedder::mock::MockEmbedder;

    #[tokio::test]
    async fn test_serve_stops_on_cancel() {
        let retriever = Arc::new(Retriever::new(
            Arc::new(MockEmbedder::default()),
            Arc::new(MemoryStore::new()),
            "e",
            "q",
        ));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(McpServer::new(retriever).serve("127.0.0.1:0", cancel.clone()));
        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_initialize_on_any_path() {
        let retriever = Arc::new(Retriever::new(
            Arc::new(MockEmbedder::default()),
            Arc::new(MemoryStore::new()),
            "e",
            "q",
        ));
        let cancel = CancellationToken::new();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = McpServer::new(retriever).router(&cancel);
        let shutdown = cancel.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
        });

        let initialize = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": "2025-03-26",
                "capabilities": {},
                "clientInfo": { "name": "test", "version": "0" }
            }
        });
        let http = reqwest::Client::new();
        for path in ["/", MCP_PATH] {
            let resp = http
                .post(format!("http://{addr}{path}"))
                .header("accept", "application/json, text/event-stream")
                .json(&initialize)
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), reqwest::StatusCode::OK, "path {path}");
            assert!(resp.headers().contains_key("mcp-session-id"), "path {path}");
        }
        cancel.cancel();
    }
}
