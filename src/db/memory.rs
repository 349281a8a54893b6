//! In-memory [`Store`] implementation for tests.
//!
//! Keeps the same contract as the pgvector store: stable ids per identity,
//! vectors only for existing chunks, and k-NN by ascending cosine distance
//! (ties broken by id).
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tokio_util::sync::CancellationToken;

use super::{ChunkRecord, Store, StoreError, dir_prefix};
use crate::chunk::{ChunkIdentity, DocChunk};

#[derive(Default)]
struct Tables {
    ids: HashMap<ChunkIdentity, i64>,
    chunks: BTreeMap<i64, ChunkRecord>,
    embeddings: HashMap<i64, Vec<f32>>,
    next_id: i64,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn chunk_count(&self) -> usize {
        self.read().chunks.len()
    }

    pub fn embedding_count(&self) -> usize {
        self.read().embeddings.len()
    }

    /// All chunk rows ordered by id.
    pub fn rows(&self) -> Vec<(i64, ChunkRecord)> {
        self.read()
            .chunks
            .iter()
            .map(|(id, rec)| (*id, rec.clone()))
            .collect()
    }
}

/// `1 - cos(a, b)`; zero vectors are maximally distant.
fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 1.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        1.0
    } else {
        1.0 - dot / (mag_a * mag_b)
    }
}

fn check(cancel: &CancellationToken) -> Result<(), StoreError> {
    if cancel.is_cancelled() {
        Err(StoreError::Cancelled)
    } else {
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_chunk(
        &self,
        cancel: &CancellationToken,
        chunk: &DocChunk,
    ) -> Result<i64, StoreError> {
        check(cancel)?;
        let key = chunk.identity();
        let record = ChunkRecord {
            data: chunk.render(),
            package: chunk.package.clone(),
            filename: chunk.filename.clone(),
            symbol: chunk.symbol.clone(),
            kind: chunk.kind.clone(),
        };

        let mut tables = self.write();
        let existing = tables.ids.get(&key).copied();
        let id = match existing {
            Some(id) => id,
            None => {
                tables.next_id += 1;
                let id = tables.next_id;
                tables.ids.insert(key, id);
                id
            }
        };
        tables.chunks.insert(id, record);
        Ok(id)
    }

    async fn upsert_vector(
        &self,
        cancel: &CancellationToken,
        id: i64,
        vector: &[f32],
    ) -> Result<(), StoreError> {
        check(cancel)?;
        let mut tables = self.write();
        if !tables.chunks.contains_key(&id) {
            return Err(StoreError::MissingChunk(id));
        }
        tables.embeddings.insert(id, vector.to_vec());
        Ok(())
    }

    fn knn<'a>(&'a self, query: &[f32], limit: i64) -> BoxStream<'a, Result<ChunkRecord, StoreError>> {
        let tables = self.read();
        let mut scored: Vec<(f32, i64)> = tables
            .embeddings
            .iter()
            .map(|(id, v)| (cosine_distance(query, v), *id))
            .collect();
        scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        let limit = usize::try_from(limit).unwrap_or(0);
        let hits: Vec<Result<ChunkRecord, StoreError>> = scored
            .into_iter()
            .take(limit)
            .filter_map(|(_, id)| tables.chunks.get(&id).cloned())
            .map(Ok)
            .collect();
        stream::iter(hits).boxed()
    }

    async fn prune(
        &self,
        cancel: &CancellationToken,
        root: &Path,
        keep: &HashSet<i64>,
    ) -> Result<u64, StoreError> {
        check(cancel)?;
        let prefix = dir_prefix(root);
        let mut tables = self.write();
        let stale: Vec<i64> = tables
            .chunks
            .iter()
            .filter(|(id, rec)| rec.filename.starts_with(&prefix) && !keep.contains(*id))
            .map(|(id, _)| *id)
            .collect();
        for id in &stale {
            tables.chunks.remove(id);
            tables.embeddings.remove(id);
        }
        tables.ids.retain(|_, id| !stale.contains(id));
        Ok(stale.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    fn chunk(symbol: &str, doc: &str) -> DocChunk {
        DocChunk {
            kind: "function".into(),
            symbol: symbol.into(),
            doc: doc.into(),
            package: "p".into(),
            filename: "/src/p/p.go".into(),
            children: vec![],
        }
    }

    #[tokio::test]
    async fn test_upsert_same_identity_same_id() {
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();
        let a = store.upsert_chunk(&cancel, &chunk("F", "old.")).await.unwrap();
        let b = store.upsert_chunk(&cancel, &chunk("F", "new.")).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(store.chunk_count(), 1);
        assert_eq!(store.rows()[0].1.data, "function F: new.");
    }

    #[tokio::test]
    async fn test_vector_requires_chunk() {
        let store = MemoryStore::new();
        let err = store
            .upsert_vector(&CancellationToken::new(), 42, &[1.0])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::MissingChunk(42)));
    }

    #[tokio::test]
    async fn test_knn_ascending_distance() {
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();
        for (sym, v) in [("Far", [0.0, 1.0]), ("Near", [1.0, 0.0]), ("Mid", [1.0, 1.0])] {
            let id = store.upsert_chunk(&cancel, &chunk(sym, "x.")).await.unwrap();
            store.upsert_vector(&cancel, id, &v).await.unwrap();
        }

        let hits: Vec<ChunkRecord> = store.knn(&[1.0, 0.0], 2).try_collect().await.unwrap();
        let symbols: Vec<&str> = hits.iter().map(|h| h.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["Near", "Mid"]);
    }

    #[tokio::test]
    async fn test_knn_skips_chunks_without_vectors() {
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();
        store.upsert_chunk(&cancel, &chunk("NoVec", "x.")).await.unwrap();
        let hits: Vec<ChunkRecord> = store.knn(&[1.0], 10).try_collect().await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_prune_removes_unseen_under_prefix() {
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();
        let keep_id = store.upsert_chunk(&cancel, &chunk("Keep", "x.")).await.unwrap();
        let gone_id = store.upsert_chunk(&cancel, &chunk("Gone", "x.")).await.unwrap();
        store.upsert_vector(&cancel, gone_id, &[1.0]).await.unwrap();
        let mut other = chunk("Other", "x.");
        other.filename = "/elsewhere/o.go".into();
        store.upsert_chunk(&cancel, &other).await.unwrap();

        let removed = store
            .prune(&cancel, Path::new("/src"), &HashSet::from([keep_id]))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.chunk_count(), 2);
        assert_eq!(store.embedding_count(), 0);
    }

    #[tokio::test]
    async fn test_prune_leaves_sibling_directories() {
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();
        let mut inside = chunk("Inside", "x.");
        inside.filename = "/src/p/p.go".into();
        let mut sibling = chunk("Sibling", "x.");
        sibling.filename = "/src/p2/q.go".into();
        store.upsert_chunk(&cancel, &inside).await.unwrap();
        store.upsert_chunk(&cancel, &sibling).await.unwrap();

        let removed = store
            .prune(&cancel, Path::new("/src/p"), &HashSet::new())
            .await
            .unwrap();
        assert_eq!(removed, 1);
        let remaining: Vec<String> = store.rows().into_iter().map(|(_, r)| r.filename).collect();
        assert_eq!(remaining, vec!["/src/p2/q.go"]);
    }

    #[tokio::test]
    async fn test_cancelled_upsert() {
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = store.upsert_chunk(&cancel, &chunk("F", "x.")).await.unwrap_err();
        assert!(matches!(err, StoreError::Cancelled));
    }
}
