use std::collections::HashSet;
use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::source::{ChunkStream, SourceParser, WalkSummary};
use crate::chunk::DocChunk;
use crate::db::Store;
use crate::embedder::Embedder;
use crate::error::Error;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct IndexStats {
    /// Chunks upserted and embedded in this run.
    pub indexed: usize,
    /// Stale chunks removed by the prune sweep.
    pub pruned: u64,
    /// Directories the walk could not parse.
    pub skipped: usize,
}

/// Drives parse → upsert → embed → upsert-vector for every chunk of a tree.
pub struct Indexer {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn Store>,
    model: String,
    concurrency: usize,
}

impl Indexer {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn Store>, model: impl Into<String>) -> Self {
        Self {
            embedder,
            store,
            model: model.into(),
            concurrency: 1,
        }
    }

    /// Number of chunks in flight at once. Each chunk still runs its own
    /// upsert before its embed.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Walk and index the tree rooted at the parser's root. With `prune`,
    /// rows under that root that were not seen in this run are deleted.
    pub async fn index_dir(
        &self,
        cancel: &CancellationToken,
        parser: SourceParser,
        prune: bool,
    ) -> Result<IndexStats, Error> {
        let root = parser.root().to_path_buf();
        info!(root = %root.display(), model = %self.model, concurrency = self.concurrency, "indexing");

        let (ids, summary) = self.consume(cancel, parser.parse(cancel)).await?;
        let mut stats = IndexStats {
            indexed: ids.len(),
            pruned: 0,
            skipped: summary.skipped.len(),
        };

        if prune && stats.skipped > 0 {
            // A skipped directory produced no ids, so its rows would all look stale.
            warn!(skipped = stats.skipped, "directories failed to parse, not pruning");
        } else if prune {
            stats.pruned = self.store.prune(cancel, &root, &ids).await?;
        }
        info!(
            indexed = stats.indexed,
            pruned = stats.pruned,
            skipped = stats.skipped,
            "indexing finished"
        );
        Ok(stats)
    }

    /// Consume `chunks` to completion. The first failure stops the run,
    /// closes the source and is returned; otherwise the walk's terminal
    /// error (if any) is.
    async fn consume(
        &self,
        cancel: &CancellationToken,
        mut chunks: ChunkStream,
    ) -> Result<(HashSet<i64>, WalkSummary), Error> {
        let mut ids = HashSet::new();
        let mut failure = None;
        {
            let mut pending = chunks
                .by_ref()
                .map(|chunk| self.index_chunk(cancel, chunk))
                .buffer_unordered(self.concurrency);
            while let Some(result) = pending.next().await {
                match result {
                    Ok(id) => {
                        ids.insert(id);
                    }
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }
        }

        let walk = chunks.finish().await;
        if let Some(e) = failure {
            return Err(e);
        }
        let summary = walk?;
        Ok((ids, summary))
    }

    async fn index_chunk(&self, cancel: &CancellationToken, chunk: DocChunk) -> Result<i64, Error> {
        let id = self.store.upsert_chunk(cancel, &chunk).await?;
        let vector = self
            .embedder
            .embed(cancel, &self.model, &chunk.render())
            .await?;
        self.store.upsert_vector(cancel, id, &vector).await?;
        debug!(id, kind = %chunk.kind, symbol = %chunk.symbol, "indexed chunk");
        Ok(id)
    }
}
