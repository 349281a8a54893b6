//! Chunk and embedding storage.
//!
//! Two linked tables: `chunks` keyed by the identity tuple
//! `(package, filename, symbol, kind)`, and `embeddings` sharing the chunk's
//! primary key. [`postgres::PgStore`] is the pgvector backend;
//! [`memory::MemoryStore`] mirrors its contract for tests.
use std::collections::HashSet;
use std::path::{MAIN_SEPARATOR, Path};

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::chunk::DocChunk;

pub mod memory;
pub mod models;
pub mod postgres;

pub use models::ChunkRecord;

/// Dimensionality of `nomic-embed-text`, the default embedding model.
pub const DEFAULT_DIMENSIONS: usize = 768;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("reading search results: {0}")]
    Cursor(#[source] sqlx::Error),

    #[error("no chunk with id {0}")]
    MissingChunk(i64),

    #[error("store operation cancelled")]
    Cancelled,
}

/// Storage backend for indexed chunks.
///
/// Implementations must be `Send + Sync`; one handle is shared by every
/// indexing worker and tool call.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert by identity, or update `data` when the identity exists.
    /// Returns the row id, which is stable for a given identity.
    async fn upsert_chunk(
        &self,
        cancel: &CancellationToken,
        chunk: &DocChunk,
    ) -> Result<i64, StoreError>;

    /// Insert or replace the vector for chunk `id`.
    async fn upsert_vector(
        &self,
        cancel: &CancellationToken,
        id: i64,
        vector: &[f32],
    ) -> Result<(), StoreError>;

    /// Chunks ordered by ascending cosine distance to `query`.
    ///
    /// The stream owns a cursor; dropping it releases the cursor whether or
    /// not it was drained.
    fn knn<'a>(&'a self, query: &[f32], limit: i64) -> BoxStream<'a, Result<ChunkRecord, StoreError>>;

    /// Delete chunks (and their vectors) stored for files under the
    /// directory `root` whose id is not in `keep`. Sibling directories that
    /// merely share a name prefix with `root` are untouched. Returns the
    /// number of chunks removed.
    async fn prune(
        &self,
        cancel: &CancellationToken,
        root: &Path,
        keep: &HashSet<i64>,
    ) -> Result<u64, StoreError>;
}

/// Filename prefix matching every file under `root` and nothing beside it.
pub fn dir_prefix(root: &Path) -> String {
    let mut prefix = root.to_string_lossy().into_owned();
    if !prefix.ends_with(MAIN_SEPARATOR) {
        prefix.push(MAIN_SEPARATOR);
    }
    prefix
}

/// pgvector text literal: `[0.1,0.2,...]`.
pub fn vector_literal(vector: &[f32]) -> String {
    let mut out = String::with_capacity(vector.len() * 10 + 2);
    out.push('[');
    for (i, v) in vector.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&v.to_string());
    }
    out.push(']');
    out
}

/// DDL for both tables with a `dimensions`-wide vector column.
pub fn schema_sql(dimensions: usize) -> String {
    format!(
        r#"
CREATE EXTENSION IF NOT EXISTS vector;

CREATE TABLE IF NOT EXISTS chunks (
    id BIGSERIAL PRIMARY KEY,
    data TEXT NOT NULL,
    package TEXT NOT NULL,
    filename TEXT NOT NULL,
    symbol TEXT NOT NULL,
    kind TEXT NOT NULL,
    UNIQUE (package, filename, symbol, kind)
);

CREATE TABLE IF NOT EXISTS embeddings (
    id BIGINT PRIMARY KEY REFERENCES chunks(id) ON DELETE CASCADE,
    embedding VECTOR({dimensions})
);
"#
    )
}
