//! Directory walk producing a lazy stream of [`DocChunk`]s.
//!
//! The walk runs on a blocking thread and feeds a bounded channel; the
//! consumer reads it as a [`Stream`] and collects the terminal walk error
//! with [`ChunkStream::finish`].
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use ignore::WalkBuilder;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::go_parser::GoFileParser;
use crate::chunk::DocChunk;
use crate::error::Error;

pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// What a finished walk left out.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WalkSummary {
    /// Directories that failed to parse. None of their chunks were produced.
    pub skipped: Vec<PathBuf>,
}

/// Walks a source tree and parses every directory it finds.
pub struct SourceParser {
    root: PathBuf,
    capacity: usize,
}

impl SourceParser {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    /// Bound on chunks buffered between the walk and its consumer.
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Start the walk. Must be called inside a Tokio runtime.
    pub fn parse(self, cancel: &CancellationToken) -> ChunkStream {
        let (tx, rx) = mpsc::channel(self.capacity);
        let cancel = cancel.clone();
        let root = self.root;
        let producer = tokio::task::spawn_blocking(move || walk(&root, &cancel, &tx));
        ChunkStream {
            rx,
            producer: Some(producer),
        }
    }
}

fn walk(root: &Path, cancel: &CancellationToken, tx: &mpsc::Sender<DocChunk>) -> Result<WalkSummary, Error> {
    let mut parser = GoFileParser::new()?;
    let mut summary = WalkSummary::default();
    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .build();

    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_some_and(|t| t.is_dir()) {
            continue;
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let dir = entry.path();
        let chunks = match parser.parse_dir(dir) {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "skipping directory");
                summary.skipped.push(dir.to_path_buf());
                continue;
            }
        };
        debug!(dir = %dir.display(), chunks = chunks.len(), "parsed directory");

        for chunk in chunks {
            if tx.blocking_send(chunk).is_err() {
                debug!("chunk consumer closed, stopping walk");
                return Ok(summary);
            }
        }
    }
    Ok(summary)
}

/// Lazy, single-pass sequence of top-level chunks from a [`SourceParser`].
///
/// Dropping the stream (or calling [`finish`](Self::finish)) releases the
/// producer at its next send.
pub struct ChunkStream {
    rx: mpsc::Receiver<DocChunk>,
    producer: Option<JoinHandle<Result<WalkSummary, Error>>>,
}

impl ChunkStream {
    /// Stop consuming and return the walk's terminal error, or the list of
    /// directories it skipped.
    pub async fn finish(mut self) -> Result<WalkSummary, Error> {
        self.rx.close();
        match self.producer.take() {
            Some(producer) => producer.await?,
            None => Ok(WalkSummary::default()),
        }
    }
}

impl Stream for ChunkStream {
    type Item = DocChunk;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<DocChunk>> {
        self.get_mut().rx.poll_recv(cx)
    }
}
