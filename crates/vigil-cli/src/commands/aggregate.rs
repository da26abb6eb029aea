//! `vigil aggregate` - stage a date's transcripts and submit the judge job.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use tracing::info;

use vigil_core::genai::VertexClient;
use vigil_daemon::aggregator::{Aggregator, AggregatorConfig};

use crate::commands::{gcs_client, load_prompt, token_provider};
use crate::config::Config;

/// Runs the daily aggregation for `date` (today when unset).
pub async fn run(config: &Config, date: Option<&str>) -> Result<()> {
    let date = match date {
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .with_context(|| format!("invalid date {raw}, expected YYYY-MM-DD"))?,
        None => Utc::now().date_naive(),
    };

    let project = Config::require(&config.project, "GOOGLE_CLOUD_PROJECT")?;
    let raw_bucket = Config::require(&config.raw_bucket, "GCS_RAW_BUCKET")?;
    let staging_bucket = Config::require(&config.staging_bucket, "GCS_BATCH_STAGING_BUCKET")?;
    let output_bucket = Config::require(&config.output_bucket, "GCS_PROCESSED_BUCKET")?;
    let model = Config::require(&config.model, "MODEL_ID")?;

    let prompt = load_prompt(&config.judge_prompt_path)?;
    let archive = gcs_client(config, &raw_bucket)?;
    let staging = gcs_client(config, &staging_bucket)?;
    let jobs = VertexClient::new(project.as_str(), config.location.as_str(), token_provider(config)?);

    let aggregator = Aggregator::new(
        Arc::new(archive),
        Arc::new(staging),
        Arc::new(jobs),
        prompt,
        AggregatorConfig {
            project,
            location: config.location.clone(),
            staging_bucket,
            output_bucket,
            model,
        },
    );

    match aggregator.run(date).await.context("aggregation failed")? {
        Some(job) => info!(job = %job.name, "aggregation complete, job submitted"),
        None => info!("aggregation complete, nothing to judge"),
    }
    Ok(())
}
