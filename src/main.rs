use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use godoc_rag::cli::{Cli, Command};
use godoc_rag::config::Config;
use godoc_rag::db::Store;
use godoc_rag::db::postgres::PgStore;
use godoc_rag::embedder::Embedder;
use godoc_rag::embedder::ollama::OllamaClient;
use godoc_rag::indexer::{Indexer, SourceParser};
use godoc_rag::mcp::McpServer;
use godoc_rag::retriever::Retriever;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, shutting down");
            on_signal.cancel();
        }
    });

    match run(cli, &cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if is_cancelled(&e) => ExitCode::from(130),
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn is_cancelled(e: &anyhow::Error) -> bool {
    e.chain()
        .any(|cause| cause.downcast_ref::<godoc_rag::Error>().is_some_and(godoc_rag::Error::is_cancelled))
}

async fn run(cli: Cli, cancel: &CancellationToken) -> Result<()> {
    let config = cli.config();
    config.validate().context("invalid configuration")?;

    let store = Arc::new(
        PgStore::connect_lazy(&config.db_url, config.max_connections)
            .context("failed to configure database pool")?,
    );
    let result = dispatch(cli.command, &config, store.clone(), cancel).await;
    store.close().await;
    result
}

async fn dispatch(
    command: Command,
    config: &Config,
    store: Arc<PgStore>,
    cancel: &CancellationToken,
) -> Result<()> {
    if let Command::Migrate { dimensions } = command {
        store.migrate(dimensions).await.context("failed to apply schema")?;
        info!(dimensions, "schema ready");
        return Ok(());
    }

    let ollama = OllamaClient::new(config.ollama_endpoint()?);
    info!(ollama = %ollama.endpoint(), "using embedding service");
    let embedder: Arc<dyn Embedder> = Arc::new(ollama);
    let store: Arc<dyn Store> = store;

    match command {
        Command::Embed { dir, prune, .. } => {
            let indexer = Indexer::new(embedder, store, config.embedding_model.clone())
                .with_concurrency(config.concurrency);
            let parser = SourceParser::new(&dir).with_capacity(config.queue_capacity);
            let stats = indexer
                .index_dir(cancel, parser, prune)
                .await
                .with_context(|| format!("failed to index {}", dir.display()))?;
            info!(
                indexed = stats.indexed,
                pruned = stats.pruned,
                skipped = stats.skipped,
                "embed complete"
            );
        }
        Command::Prompt { prompt, stream } => {
            let retriever = Retriever::new(
                embedder,
                store,
                config.embedding_model.clone(),
                config.query_model.clone(),
            );
            let mut stdout = std::io::stdout();
            retriever
                .prompt(cancel, &prompt, stream, &mut stdout)
                .await
                .context("failed to generate response")?;
            stdout.flush()?;
        }
        Command::Mcp { .. } => {
            let retriever = Arc::new(Retriever::new(
                embedder,
                store,
                config.embedding_model.clone(),
                config.query_model.clone(),
            ));
            McpServer::new(retriever)
                .serve(&config.listen_addr(), cancel.clone())
                .await?;
        }
        Command::Migrate { .. } => {}
    }
    Ok(())
}
