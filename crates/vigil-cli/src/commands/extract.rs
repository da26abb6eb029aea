//! `vigil extract` - consume judge results and harvest injections.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use vigil_core::bus::KafkaConsumer;
use vigil_core::genai::VertexClient;
use vigil_daemon::extractor::{Extractor, ExtractorConfig};

use crate::commands::{load_prompt, shutdown_on_signal, token_provider, vector_index};
use crate::config::Config;

/// Runs the extractor until its idle timeout or SIGINT.
pub async fn run(config: &Config, dry_run: bool, strict: bool) -> Result<()> {
    let consumer = KafkaConsumer::subscribe(
        &config.kafka()?,
        &config.extractor_group,
        &config.results_topic,
    )
    .context("failed to create kafka consumer")?;

    let project = Config::require(&config.project, "GOOGLE_CLOUD_PROJECT")?;
    let index = vector_index(config)?;
    let generator =
        VertexClient::new(project.as_str(), config.location.as_str(), token_provider(config)?);
    let prompt = load_prompt(&config.extract_prompt_path)?;

    let extractor = Extractor::new(
        Arc::new(consumer),
        Arc::new(index),
        Arc::new(generator),
        prompt,
        ExtractorConfig {
            topic: config.results_topic.clone(),
            idle_timeout: config.idle_timeout,
            dry_run: dry_run || config.dry_run,
            strict_extraction: strict,
            ..ExtractorConfig::default()
        },
    );
    shutdown_on_signal(extractor.shutdown_handle());

    let summary = extractor.run().await.context("extractor run failed")?;
    info!(
        consumed = summary.consumed,
        upserted = summary.upserted,
        skipped = summary.skipped,
        empty_extractions = summary.empty_extractions,
        "extraction run complete"
    );
    Ok(())
}
