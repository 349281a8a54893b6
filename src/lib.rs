//! # godoc-rag: Go documentation RAG over pgvector and MCP
//!
//! Parses the documented public surface of a Go source tree, embeds each
//! declaration through a local Ollama daemon, stores the vectors in Postgres
//! with pgvector, and serves semantic search to AI assistants via the Model
//! Context Protocol.
//!
//! ## Architecture
//!
//! - **[`chunk`]**: `DocChunk` value type and its deterministic rendering
//! - **[`indexer`]**: tree-sitter Go parser, streaming directory walk, index pipeline
//! - **[`embedder`]**: Ollama embed/generate client and a deterministic mock
//! - **[`db`]**: `Store` trait with pgvector and in-memory backends
//! - **[`retriever`]**: semantic search with deferred errors, RAG prompting
//! - **[`mcp`]**: `search` tool served over streamable HTTP (rmcp + axum)
//! - **[`config`]** / **[`cli`]**: defaults, validation, command line

pub mod chunk;
pub mod cli;
pub mod config;
pub mod db;
pub mod embedder;
pub mod error;
pub mod indexer;
pub mod mcp;
pub mod retriever;

pub use error::Error;
