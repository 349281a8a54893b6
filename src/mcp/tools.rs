/// MCP tool handler for godoc-rag.
///
/// One tool, `search`: semantic search over indexed Go documentation.
use std::sync::Arc;

use futures::StreamExt;
use rmcp::handler::server::ServerHandler;
use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::wrapper::{Json, Parameters};
use rmcp::service::RequestContext;
use rmcp::{ErrorData as McpError, RoleServer, model::*, tool, tool_handler, tool_router};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::db::ChunkRecord;
use crate::error::Error;
use crate::retriever::{DEFAULT_LIMIT, Retriever};

pub const SERVER_NAME: &str = "godoc-rag";
pub const SERVER_VERSION: &str = "v1.0.0";

const INSTRUCTIONS: &str = "This MCP server provides semantic search capabilities over Go
package documentation. It parses documentation from both internal projects
and external Go modules, generates vector embeddings, and stores them in
pgvector. When queried, the server retrieves the most relevant doc snippets,
functions, or API descriptions based on semantic similarity.

Use this server to:
- Look up Go functions, types, methods, and usage examples.
- Understand external packages or internal APIs without manually browsing docs.
- Aid code generation by retrieving contextually relevant Go documentation.

The server is not a code executor or compiler; it strictly provides
semantic search results from the indexed documentation.";

// ── Parameter structs ────────────────────────────────────────────────

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchInput {
    /// input to use for semantic search
    pub query: String,
    /// max number of results to get from the search
    #[serde(default)]
    pub limit: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, JsonSchema)]
pub struct SearchItem {
    /// type of the symbol (function, struct, package, etc.)
    pub kind: String,
    /// name of the symbol
    pub symbol: String,
    /// relevant context data (i.e. comment text)
    pub data: String,
    /// name of the Go package
    pub package: String,
    /// filename for the data
    pub filename: String,
}

#[derive(Debug, Default, Serialize, JsonSchema)]
pub struct SearchOutput {
    /// array of context data from the semantic search
    pub data: Vec<SearchItem>,
}

impl From<ChunkRecord> for SearchItem {
    fn from(r: ChunkRecord) -> Self {
        Self {
            kind: r.kind,
            symbol: r.symbol,
            data: r.data,
            package: r.package,
            filename: r.filename,
        }
    }
}

// ── Tool implementations ─────────────────────────────────────────────

#[derive(Clone)]
pub struct SearchServer {
    retriever: Arc<Retriever>,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl SearchServer {
    pub fn new(retriever: Arc<Retriever>) -> Self {
        Self {
            retriever,
            tool_router: Self::tool_router(),
        }
    }

    /// Run a search outside the protocol layer. `limit <= 0` means the default.
    pub async fn run_search(&self, cancel: &CancellationToken, input: SearchInput) -> Result<SearchOutput, Error> {
        let limit = if input.limit > 0 { input.limit } else { DEFAULT_LIMIT };
        let mut results = self
            .retriever
            .semantic_search(cancel, &input.query, limit)
            .await?;

        let mut output = SearchOutput::default();
        while let Some(record) = results.next().await {
            output.data.push(record.into());
        }
        results.finish()?;
        debug!(query = %input.query, hits = output.data.len(), "search served");
        Ok(output)
    }

    #[tool(description = "Perform a semantic search on the Go documentation data")]
    async fn search(
        &self,
        Parameters(input): Parameters<SearchInput>,
        context: RequestContext<RoleServer>,
    ) -> Result<Json<SearchOutput>, McpError> {
        if input.query.trim().is_empty() {
            return Err(McpError::invalid_params("query is required", None));
        }
        match self.run_search(&context.ct, input).await {
            Ok(output) => Ok(Json(output)),
            Err(Error::Cancelled) => Err(McpError::internal_error("request cancelled", None)),
            Err(e) => {
                warn!(error = %e, "search failed");
                Err(McpError::internal_error(format!("error performing search: {e}"), None))
            }
        }
    }
}

#[tool_handler]
impl ServerHandler for SearchServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: SERVER_NAME.to_string(),
                title: Some("Go documentation RAG".to_string()),
                version: SERVER_VERSION.to_string(),
                description: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(INSTRUCTIONS.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::DocChunk;
    use crate::db::Store;
    use crate::db::memory::MemoryStore;
    use crate::embedder::mock::MockEmbedder;

    async fn server_with(symbols: &[&str]) -> SearchServer {
        let store = Arc::new(MemoryStore::new());
        let cancel = CancellationToken::new();
        for (i, symbol) in symbols.iter().enumerate() {
            let chunk = DocChunk {
                kind: "function".into(),
                symbol: (*symbol).into(),
                doc: "does things.".into(),
                package: "example".into(),
                filename: "example.go".into(),
                children: vec![],
            };
            let id = store.upsert_chunk(&cancel, &chunk).await.unwrap();
            store.upsert_vector(&cancel, id, &[1.0, i as f32]).await.unwrap();
        }
        let embedder = Arc::new(MockEmbedder::default().with_fixed_vector(vec![1.0, 0.0]));
        SearchServer::new(Arc::new(Retriever::new(embedder, store, "e", "q")))
    }

    #[tokio::test]
    async fn test_run_search_respects_limit() {
        let server = server_with(&["A", "B", "C", "D"]).await;
        let out = server
            .run_search(&CancellationToken::new(), SearchInput { query: "x".into(), limit: 2 })
            .await
            .unwrap();
        assert_eq!(out.data.len(), 2);
        assert_eq!(out.data[0].symbol, "A");
    }

    #[tokio::test]
    async fn test_non_positive_limit_uses_default() {
        let server = server_with(&["A", "B", "C", "D"]).await;
        let out = server
            .run_search(&CancellationToken::new(), SearchInput { query: "x".into(), limit: 0 })
            .await
            .unwrap();
        assert_eq!(out.data.len() as i64, DEFAULT_LIMIT);
    }

    #[test]
    fn test_output_uses_lowercase_keys() {
        let out = SearchOutput {
            data: vec![SearchItem {
                kind: "function".into(),
                symbol: "F".into(),
                data: "function F: x".into(),
                package: "p".into(),
                filename: "p.go".into(),
            }],
        };
        let json = serde_json::to_value(&out).unwrap();
        let item = &json["data"][0];
        for key in ["kind", "symbol", "data", "package", "filename"] {
            assert!(item.get(key).is_some(), "missing key {key}");
        }
    }

    #[tokio::test]
    async fn test_server_info() {
        let server = server_with(&[]).await;
        let info = server.get_info();
        assert_eq!(info.server_info.name, "godoc-rag");
        assert_eq!(info.server_info.version, "v1.0.0");
        assert!(info.instructions.unwrap().contains("semantic search"));
        assert!(info.capabilities.tools.is_some());
    }

    #[test]
    fn test_search_tool_registered() {
        let router = SearchServer::tool_router();
        let tools = router.list_all();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "search");
    }
}
