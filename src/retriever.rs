//! Query-time path: embed a question, k-NN the store, optionally hand the
//! hits to a generation model.
use std::fmt::Write as _;
use std::future::Future;
use std::io::Write;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::stream::{BoxStream, Stream, StreamExt};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::debug;

use crate::db::{ChunkRecord, Store, StoreError};
use crate::embedder::{Embedder, GenerateRequest};
use crate::error::Error;

/// Hits fed into a `prompt` call.
pub const DEFAULT_LIMIT: i64 = 3;

/// System prompt for generation. The unterminated quote on the last line is
/// kept as-is so prompts stay byte-compatible with existing deployments.
pub const SYSTEM_PROMPT: &str = r#"You will receive user prompts/queries along with real context from RAG.
The user prompt will be surrounded by <user></user>
The context will be surrounded by <context source="..."></context>
Provide the user details about the source of the context that you use.
If the context doesn't contain relevant information, say "I don't have enough information to answer that question."#;

pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn Store>,
    embedding_model: String,
    query_model: String,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn Store>,
        embedding_model: impl Into<String>,
        query_model: impl Into<String>,
    ) -> Self {
        Self {
            embedder,
            store,
            embedding_model: embedding_model.into(),
            query_model: query_model.into(),
        }
    }

    /// Embed `query` and open a k-NN cursor over the store.
    ///
    /// The returned stream is lazy. Errors (and cancellation) met while
    /// reading it end the stream and are reported by
    /// [`SearchResults::finish`].
    pub async fn semantic_search(
        &self,
        cancel: &CancellationToken,
        query: &str,
        limit: i64,
    ) -> Result<SearchResults<'_>, Error> {
        let vector = self
            .embedder
            .embed(cancel, &self.embedding_model, query)
            .await?;
        debug!(limit, dims = vector.len(), "opening k-NN cursor");
        Ok(SearchResults {
            rows: Some(self.store.knn(&vector, limit)),
            cancelled: Box::pin(cancel.clone().cancelled_owned()),
            error: None,
        })
    }

    /// Retrieve context for `query` and write the model's answer to `out`.
    pub async fn prompt<W: Write + Send>(
        &self,
        cancel: &CancellationToken,
        query: &str,
        stream: bool,
        out: &mut W,
    ) -> Result<(), Error> {
        let mut results = self.semantic_search(cancel, query, DEFAULT_LIMIT).await?;
        let mut hits = Vec::new();
        while let Some(hit) = results.next().await {
            hits.push(hit);
        }
        results.finish()?;

        let prompt = build_prompt(query, &build_context(&hits));
        debug!(hits = hits.len(), %prompt, "generating");

        let request = GenerateRequest {
            model: self.query_model.clone(),
            prompt,
            system: SYSTEM_PROMPT.to_string(),
            stream,
        };
        self.embedder
            .generate(cancel, &request, &mut |token: &str| -> std::io::Result<()> {
                out.write_all(token.as_bytes())?;
                out.flush()
            })
            .await?;
        writeln!(out)?;
        Ok(())
    }
}

/// Lazy k-NN results with a deferred error.
///
/// Dropping the value, draining it, or calling [`finish`](Self::finish)
/// releases the cursor.
pub struct SearchResults<'a> {
    rows: Option<BoxStream<'a, Result<ChunkRecord, StoreError>>>,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
    error: Option<Error>,
}

impl SearchResults<'_> {
    /// Release the cursor and return the error that ended the stream, if any.
    pub fn finish(mut self) -> Result<(), Error> {
        self.rows = None;
        match self.error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Stream for SearchResults<'_> {
    type Item = ChunkRecord;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<ChunkRecord>> {
        let this = self.get_mut();
        let Some(rows) = this.rows.as_mut() else {
            return Poll::Ready(None);
        };

        if this.cancelled.as_mut().poll(cx).is_ready() {
            this.rows = None;
            this.error = Some(Error::Cancelled);
            return Poll::Ready(None);
        }

        match rows.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(row))) => Poll::Ready(Some(row)),
            Poll::Ready(Some(Err(e))) => {
                this.rows = None;
                this.error = Some(e.into());
                Poll::Ready(None)
            }
            Poll::Ready(None) => {
                this.rows = None;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// One `<context ...>DATA</context>` line per hit.
pub fn build_context(hits: &[ChunkRecord]) -> String {
    let mut out = String::new();
    for hit in hits {
        let _ = writeln!(
            out,
            "<context package={} filename={} symbol={} kind={}>{}</context>",
            quote(&hit.package),
            quote(&hit.filename),
            quote(&hit.symbol),
            quote(&hit.kind),
            hit.data,
        );
    }
    out
}

pub fn build_prompt(query: &str, context: &str) -> String {
    format!("<user>{query}</user>\n{context}")
}

/// Double-quoted string literal with backslash escapes.
fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{07}' => out.push_str("\\a"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0b}' => out.push_str("\\v"),
            '\u{0c}' => out.push_str("\\f"),
            c if (c as u32) < 0x20 || c == '\u{7f}' => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::DocChunk;
    use crate::db::memory::MemoryStore;
    use crate::embedder::mock::MockEmbedder;
    use std::time::Duration;

    fn record(symbol: &str) -> ChunkRecord {
        ChunkRecord {
            data: format!("function {symbol}: does things."),
            package: "example".into(),
            filename: "fixtures/example/example.go".into(),
            symbol: symbol.into(),
            kind: "function".into(),
        }
    }

    async fn seeded(embedder: Arc<MockEmbedder>) -> Retriever {
        let store = Arc::new(MemoryStore::new());
        let cancel = CancellationToken::new();
        for (symbol, v) in [("A", [1.0, 0.0]), ("B", [0.8, 0.2]), ("C", [0.0, 1.0])] {
            let chunk = DocChunk {
                kind: "function".into(),
                symbol: symbol.into(),
                doc: "does things.".into(),
                package: "example".into(),
                filename: "fixtures/example/example.go".into(),
                children: vec![],
            };
            let id = store.upsert_chunk(&cancel, &chunk).await.unwrap();
            store.upsert_vector(&cancel, id, &v).await.unwrap();
        }
        Retriever::new(embedder, store, "embed", "query")
    }

    #[test]
    fn test_build_context_quotes_fields() {
        let mut hit = record("F");
        hit.filename = "dir/\"odd\".go".into();
        assert_eq!(
            build_context(&[hit]),
            "<context package=\"example\" filename=\"dir/\\\"odd\\\".go\" symbol=\"F\" kind=\"function\">function F: does things.</context>\n"
        );
    }

    #[test]
    fn test_build_context_is_deterministic() {
        let hits = vec![record("A"), record("B")];
        assert_eq!(build_context(&hits), build_context(&hits.clone()));
        assert_eq!(build_context(&[]), "");
    }

    #[test]
    fn test_build_prompt() {
        assert_eq!(build_prompt("why?", "<context>x</context>\n"), "<user>why?</user>\n<context>x</context>\n");
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote("a\tb\\c\u{1}"), "\"a\\tb\\\\c\\x01\"");
        assert_eq!(quote("héllo"), "\"héllo\"");
    }

    #[test]
    fn test_system_prompt_kept_verbatim() {
        assert!(SYSTEM_PROMPT.ends_with("say \"I don't have enough information to answer that question."));
        assert_eq!(SYSTEM_PROMPT.lines().count(), 5);
    }

    #[tokio::test]
    async fn test_semantic_search_orders_and_limits() {
        let embedder = Arc::new(MockEmbedder::default().with_fixed_vector(vec![1.0, 0.0]));
        let retriever = seeded(embedder).await;
        let cancel = CancellationToken::new();

        let results = retriever.semantic_search(&cancel, "q", 2).await.unwrap();
        let hits: Vec<ChunkRecord> = results.collect().await;
        let symbols: Vec<&str> = hits.iter().map(|h| h.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_finish_reports_cancellation() {
        let embedder = Arc::new(MockEmbedder::default().with_fixed_vector(vec![1.0, 0.0]));
        let retriever = seeded(embedder).await;
        let cancel = CancellationToken::new();

        let mut results = retriever.semantic_search(&cancel, "q", 3).await.unwrap();
        assert!(results.next().await.is_some());
        cancel.cancel();
        assert!(results.next().await.is_none());
        assert!(results.finish().unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_prompt_writes_tokens_and_sends_context() {
        let embedder = Arc::new(
            MockEmbedder::default()
                .with_fixed_vector(vec![1.0, 0.0])
                .with_tokens(["Look at ", "A."], Duration::ZERO),
        );
        let retriever = seeded(embedder.clone()).await;
        let mut out = Vec::new();
        retriever
            .prompt(&CancellationToken::new(), "which?", true, &mut out)
            .await
            .unwrap();

        assert_eq!(String::from_utf8(out).unwrap(), "Look at A.\n");
        let requests = embedder.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].model, "query");
        assert_eq!(requests[0].system, SYSTEM_PROMPT);
        assert!(requests[0].prompt.starts_with("<user>which?</user>\n<context package=\"example\""));
        assert_eq!(requests[0].prompt.matches("</context>\n").count(), 3);
    }
}
