//! `vigil gate` - serve the ingestion endpoint.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use vigil_core::bus::KafkaPublisher;
use vigil_daemon::gate::{Gate, GateConfig};

use crate::commands::{shutdown_signal, vector_index};
use crate::config::Config;

/// Runs the gate HTTP service until SIGINT.
pub async fn run(config: &Config, port: Option<u16>) -> Result<()> {
    let publisher =
        KafkaPublisher::new(&config.kafka()?).context("failed to create kafka producer")?;
    let index = vector_index(config)?;

    let gate = Arc::new(Gate::new(
        Arc::new(publisher),
        Arc::new(index),
        GateConfig {
            topic: config.interactions_topic.clone(),
            ..GateConfig::default()
        },
    ));

    let addr: SocketAddr = ([0, 0, 0, 0], port.unwrap_or(config.port)).into();
    gate.serve(addr, shutdown_signal())
        .await
        .context("gate server failed")?;

    info!("gate shut down");
    Ok(())
}
