//! Subcommand implementations and shared adapter wiring.

pub mod aggregate;
pub mod archive;
pub mod extract;
pub mod fanout;
pub mod gate;

use std::sync::Arc;

use anyhow::{Context, Result};

use vigil_core::auth::{AccessTokenProvider, StaticTokenProvider};
use vigil_core::blob::GcsClient;
use vigil_core::vector::PineconeClient;

use crate::config::Config;

/// Builds the Google API token provider from configuration.
pub fn token_provider(config: &Config) -> Result<Arc<dyn AccessTokenProvider>> {
    let token = Config::require(&config.google_access_token, "GOOGLE_OAUTH_ACCESS_TOKEN")?;
    Ok(Arc::new(StaticTokenProvider::new(token)))
}

/// Builds a bucket-scoped GCS client.
pub fn gcs_client(config: &Config, bucket: &str) -> Result<GcsClient> {
    Ok(GcsClient::new(bucket, token_provider(config)?))
}

/// Builds the Pinecone index client.
pub fn vector_index(config: &Config) -> Result<PineconeClient> {
    let api_key = Config::require(&config.pinecone_api_key, "PINECONE_API_KEY")?;
    let host = Config::require(&config.pinecone_index_host, "PINECONE_INDEX_HOST")?;
    Ok(PineconeClient::new(&host, api_key))
}

/// Waits for SIGINT, used as the graceful-shutdown signal.
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install signal handler");
    }
}

/// Spawns a task that flips `shutdown` when SIGINT arrives.
pub fn shutdown_on_signal(shutdown: Arc<std::sync::atomic::AtomicBool>) {
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown requested");
        shutdown.store(true, std::sync::atomic::Ordering::SeqCst);
    });
}

/// Loads a prompt template, mapping failure to a fatal setup error.
pub fn load_prompt(path: &std::path::Path) -> Result<vigil_core::prompt::PromptTemplate> {
    vigil_core::prompt::PromptTemplate::from_path(path)
        .with_context(|| format!("failed to load prompt template {}", path.display()))
}
