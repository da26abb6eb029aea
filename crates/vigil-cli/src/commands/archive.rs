//! `vigil archive` - one archiver run.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use vigil_core::bus::KafkaConsumer;
use vigil_daemon::archiver::{Archiver, ArchiverConfig};

use crate::commands::{gcs_client, shutdown_on_signal};
use crate::config::Config;

/// Drains the interactions topic into archive chunks and commits.
pub async fn run(config: &Config) -> Result<()> {
    let consumer = KafkaConsumer::subscribe(
        &config.kafka()?,
        &config.archiver_group,
        &config.interactions_topic,
    )
    .context("failed to create kafka consumer")?;

    let raw_bucket = Config::require(&config.raw_bucket, "GCS_RAW_BUCKET")?;
    let blobs = gcs_client(config, &raw_bucket)?;

    let archiver = Archiver::new(
        Arc::new(consumer),
        Arc::new(blobs),
        ArchiverConfig {
            topic: config.interactions_topic.clone(),
            ..ArchiverConfig::default()
        },
    );
    shutdown_on_signal(archiver.shutdown_handle());

    let summary = archiver.run_once().await.context("archiver run failed")?;
    info!(
        conversations = summary.conversations,
        records = summary.records,
        "archive run complete"
    );
    Ok(())
}
