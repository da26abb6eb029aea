//! `vigil fanout` - republish one finalized result object.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use vigil_core::bus::KafkaPublisher;
use vigil_daemon::fanout::{ObjectFinalized, ResultFanout};

use crate::commands::gcs_client;
use crate::config::Config;

/// Fans the given object out onto the results topic.
pub async fn run(config: &Config, bucket: String, name: String) -> Result<()> {
    let publisher =
        KafkaPublisher::new(&config.kafka()?).context("failed to create kafka producer")?;
    let reader = gcs_client(config, &bucket)?;

    let fanout = ResultFanout::with_topic(
        Arc::new(reader),
        Arc::new(publisher),
        &config.results_topic,
    );

    let count = fanout
        .process(&ObjectFinalized { bucket, name })
        .await
        .context("fan-out failed")?;
    info!(count, "fan-out complete");
    Ok(())
}
