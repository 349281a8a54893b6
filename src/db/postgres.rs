//! Postgres + pgvector backed [`Store`].
use std::collections::HashSet;
use std::future::Future;
use std::path::Path;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{ChunkRecord, Store, StoreError, dir_prefix, schema_sql, vector_literal};
use crate::chunk::DocChunk;

pub(crate) const UPSERT_CHUNK_SQL: &str = r#"
INSERT INTO chunks (data, package, filename, symbol, kind)
VALUES ($1, $2, $3, $4, $5)
ON CONFLICT (package, filename, symbol, kind) DO UPDATE SET data = EXCLUDED.data
RETURNING id
"#;

pub(crate) const UPSERT_VECTOR_SQL: &str = r#"
INSERT INTO embeddings (id, embedding)
VALUES ($1, $2::vector)
ON CONFLICT (id) DO UPDATE SET embedding = EXCLUDED.embedding
"#;

pub(crate) const KNN_SQL: &str = r#"
SELECT c.data, c.package, c.filename, c.symbol, c.kind
FROM chunks c
JOIN embeddings e ON c.id = e.id
ORDER BY e.embedding <=> $1::vector
LIMIT $2
"#;

const PRUNE_EMBEDDINGS_SQL: &str = r#"
DELETE FROM embeddings
WHERE id IN (
    SELECT id FROM chunks WHERE starts_with(filename, $1) AND NOT (id = ANY($2))
)
"#;

const PRUNE_CHUNKS_SQL: &str =
    "DELETE FROM chunks WHERE starts_with(filename, $1) AND NOT (id = ANY($2))";

/// pgvector implementation of the [`Store`] trait.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a pool without opening a connection; the first query connects.
    pub fn connect_lazy(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_lazy(url)?;
        Ok(Self { pool })
    }

    /// Create the extension and both tables if missing.
    pub async fn migrate(&self, dimensions: usize) -> Result<(), StoreError> {
        info!(dimensions, "applying schema");
        sqlx::raw_sql(&schema_sql(dimensions))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T, sqlx::Error>>,
) -> Result<T, StoreError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StoreError::Cancelled),
        res = fut => Ok(res?),
    }
}

#[async_trait]
impl Store for PgStore {
    async fn upsert_chunk(
        &self,
        cancel: &CancellationToken,
        chunk: &DocChunk,
    ) -> Result<i64, StoreError> {
        let query = sqlx::query_scalar::<_, i64>(UPSERT_CHUNK_SQL)
            .bind(chunk.render())
            .bind(&chunk.package)
            .bind(&chunk.filename)
            .bind(&chunk.symbol)
            .bind(&chunk.kind);
        cancellable(cancel, query.fetch_one(&self.pool)).await
    }

    async fn upsert_vector(
        &self,
        cancel: &CancellationToken,
        id: i64,
        vector: &[f32],
    ) -> Result<(), StoreError> {
        let query = sqlx::query(UPSERT_VECTOR_SQL)
            .bind(id)
            .bind(vector_literal(vector));
        cancellable(cancel, query.execute(&self.pool)).await?;
        Ok(())
    }

    fn knn<'a>(&'a self, query: &[f32], limit: i64) -> BoxStream<'a, Result<ChunkRecord, StoreError>> {
        sqlx::query_as::<_, ChunkRecord>(KNN_SQL)
            .bind(vector_literal(query))
            .bind(limit)
            .fetch(&self.pool)
            .map_err(StoreError::Cursor)
            .boxed()
    }

    async fn prune(
        &self,
        cancel: &CancellationToken,
        root: &Path,
        keep: &HashSet<i64>,
    ) -> Result<u64, StoreError> {
        let prefix = dir_prefix(root);
        let keep: Vec<i64> = keep.iter().copied().collect();
        let work = async {
            let mut tx = self.pool.begin().await?;
            sqlx::query(PRUNE_EMBEDDINGS_SQL)
                .bind(&prefix)
                .bind(&keep)
                .execute(&mut *tx)
                .await?;
            let removed = sqlx::query(PRUNE_CHUNKS_SQL)
                .bind(&prefix)
                .bind(&keep)
                .execute(&mut *tx)
                .await?
                .rows_affected();
            tx.commit().await?;
            Ok::<_, sqlx::Error>(removed)
        };
        cancellable(cancel, work).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_chunk_sql_returns_id() {
        assert!(UPSERT_CHUNK_SQL.contains("ON CONFLICT (package, filename, symbol, kind)"));
        assert!(UPSERT_CHUNK_SQL.contains("DO UPDATE SET data = EXCLUDED.data"));
        assert!(UPSERT_CHUNK_SQL.trim_end().ends_with("RETURNING id"));
    }

    #[test]
    fn test_knn_orders_by_cosine_distance() {
        assert!(KNN_SQL.contains("ORDER BY e.embedding <=> $1::vector"));
        assert!(KNN_SQL.contains("LIMIT $2"));
    }

    #[test]
    fn test_vector_upsert_replaces() {
        assert!(UPSERT_VECTOR_SQL.contains("ON CONFLICT (id) DO UPDATE"));
    }

    #[tokio::test]
    async fn test_connect_lazy_does_not_connect() {
        let store = PgStore::connect_lazy("postgres://nobody@127.0.0.1:1/none", 1);
        assert!(store.is_ok(), "lazy pool should not dial the server");
    }
}
