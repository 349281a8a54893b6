//! MCP tool server exposing semantic search.
pub mod server;
pub mod tools;

pub use server::McpServer;
pub use tools::SearchServer;
