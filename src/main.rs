use anyhow::Context;
use database::Database;
use embedding_engine::{AzureOpenAiProvider, EmbeddingEngine};
use matching_service::MatchingRuntime;
use std::sync::Arc;
use thoughtmates_core::AppConfig;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str =
    "thoughtmates=info,matching_service=info,database=info,embedding_engine=info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("Starting Thoughtmates matching service");

    let config = AppConfig::from_env().context("failed to load configuration")?;

    let db = Database::connect(&config.database)
        .await
        .context("failed to open database")?;
    db.run_migrations()
        .await
        .context("failed to run migrations")?;
    let db = Arc::new(db);

    let provider = AzureOpenAiProvider::new(&config.embedding)
        .context("failed to build embedding provider")?;
    let embeddings = Arc::new(EmbeddingEngine::new(Arc::new(provider), &config.embedding));

    let cancel = CancellationToken::new();
    let runtime = MatchingRuntime::start(db.clone(), embeddings, &config, cancel.clone());

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("Shutdown requested");

    cancel.cancel();
    runtime.shutdown().await;
    db.close().await;

    tracing::info!("Thoughtmates stopped");
    Ok(())
}
