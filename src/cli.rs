//! Command-line surface of the `godoc-rag` binary.
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{self, Config};

pub const DEFAULT_PROMPT: &str =
    "I am designing another package that needs to update a user's email. Which files should I look at first?";

/// godoc-rag: index Go package documentation into pgvector and serve
/// semantic search to AI assistants over MCP.
#[derive(Parser, Debug)]
#[command(name = "godoc-rag", version, about)]
pub struct Cli {
    /// Postgres connection string.
    #[arg(long = "db", env = "GODOC_RAG_DB", global = true, default_value = config::DEFAULT_DB_URL)]
    pub db: String,

    /// Ollama model used to embed chunks and queries.
    #[arg(long, global = true, default_value = config::DEFAULT_EMBEDDING_MODEL)]
    pub embedding_model: String,

    /// Ollama model used to answer `prompt` queries.
    #[arg(long, global = true, default_value = config::DEFAULT_QUERY_MODEL)]
    pub query_model: String,

    /// Ollama daemon address (scheme and port optional).
    #[arg(long, env = "OLLAMA_HOST", global = true, hide = true)]
    pub ollama_host: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Parse a Go source tree and index its documentation.
    Embed {
        /// Root of the tree to index.
        #[arg(long)]
        dir: PathBuf,

        /// Chunks embedded in parallel.
        #[arg(long, default_value_t = 1)]
        concurrency: usize,

        /// Delete rows under `dir` that this run did not produce.
        #[arg(long)]
        prune: bool,
    },

    /// Answer a question with retrieved documentation as context.
    Prompt {
        #[arg(long, default_value = DEFAULT_PROMPT)]
        prompt: String,

        /// Print tokens as they are generated.
        #[arg(long)]
        stream: bool,
    },

    /// Run the MCP search server over streamable HTTP.
    Mcp {
        /// Listen address; `:port` binds all interfaces.
        #[arg(long, env = "ADDR", default_value = config::DEFAULT_ADDR)]
        addr: String,
    },

    /// Create the pgvector extension and tables.
    ///
    /// Idempotent. `--dimensions` must match the embedding model's output.
    Migrate {
        #[arg(long, default_value_t = crate::db::DEFAULT_DIMENSIONS)]
        dimensions: usize,
    },
}

impl Cli {
    /// Resolved configuration for this invocation.
    #[must_use]
    pub fn config(&self) -> Config {
        let mut cfg = Config {
            db_url: self.db.clone(),
            embedding_model: self.embedding_model.clone(),
            query_model: self.query_model.clone(),
            ollama_host: self.ollama_host.clone(),
            ..Config::default()
        };
        match &self.command {
            Command::Embed { concurrency, .. } => cfg.concurrency = *concurrency,
            Command::Mcp { addr } => cfg.addr = addr.clone(),
            Command::Migrate { dimensions } => cfg.dimensions = *dimensions,
            Command::Prompt { .. } => {}
        }
        cfg
    }
}
