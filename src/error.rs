//! Crate-level error returned by the indexing, retrieval and serving entry points.
use thiserror::Error;

use crate::db::StoreError;
use crate::embedder::EmbedderError;

/// Errors surfaced by [`Indexer`](crate::indexer::core::Indexer),
/// [`Retriever`](crate::retriever::Retriever) and the source walk.
///
/// Cancellation is always reported as [`Error::Cancelled`], even when it was
/// observed inside the embedding client or the store.
#[derive(Error, Debug)]
pub enum Error {
    #[error("walking source tree: {0}")]
    Walk(#[from] ignore::Error),

    #[error("loading Go grammar: {0}")]
    Grammar(#[from] tree_sitter::LanguageError),

    #[error("source parser task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Embedding(EmbedderError),

    #[error(transparent)]
    Store(StoreError),

    #[error("writing output: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

impl From<EmbedderError> for Error {
    fn from(e: EmbedderError) -> Self {
        match e {
            EmbedderError::Cancelled => Error::Cancelled,
            other => Error::Embedding(other),
        }
    }
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Cancelled => Error::Cancelled,
            other => Error::Store(other),
        }
    }
}
