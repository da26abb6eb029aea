//! Archiver: drains the interactions topic into date-partitioned chunks.
//!
//! Runs as a periodic one-shot job. A run consumes until the bus has been
//! idle for the configured gap, groups everything by conversation, writes
//! one chunk object per conversation, and only then commits the consume
//! position. The commit rule is the stage's single invariant: offsets
//! advance iff every chunk of the batch is durably persisted. A crash or
//! write failure before the commit reconsumes the batch next run, producing
//! duplicate chunks under fresh uuids, which the aggregator tolerates.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use vigil_core::blob::{raw_chunk_key, BlobError, BlobWriter};
use vigil_core::bus::{BusError, EventConsumer, INTERACTIONS_TOPIC};
use vigil_core::schema::InteractionEvent;

/// Errors raised by an archiver run.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ArchiverError {
    /// Consuming from the bus failed.
    #[error("consumption error: {0}")]
    Consume(#[source] BusError),

    /// A record could not be serialized into its chunk.
    #[error("failed to encode archive record: {0}")]
    Encode(#[from] serde_json::Error),

    /// A chunk write failed; the run aborts before committing.
    #[error("archive write error: {0}")]
    Write(#[source] BlobError),

    /// The offset commit failed after all chunks were written.
    #[error("failed to commit offsets: {0}")]
    Commit(#[source] BusError),

    /// The run was cancelled mid-drain; nothing was committed.
    #[error("archiver run cancelled")]
    Cancelled,
}

/// Archiver tuning knobs.
#[derive(Debug, Clone)]
pub struct ArchiverConfig {
    /// Topic to drain.
    pub topic: String,
    /// Consecutive idle gap that ends a run's drain.
    pub idle_timeout: Duration,
    /// Upper bound on a single bus poll; bounds cancellation latency.
    pub poll_timeout: Duration,
}

impl Default for ArchiverConfig {
    fn default() -> Self {
        Self {
            topic: INTERACTIONS_TOPIC.to_string(),
            idle_timeout: Duration::from_secs(10),
            poll_timeout: Duration::from_millis(500),
        }
    }
}

/// What a run consumed and wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveSummary {
    /// Conversations that received a chunk.
    pub conversations: usize,
    /// Interaction records archived.
    pub records: usize,
    /// Undecodable bus records that were dropped.
    pub corrupt: usize,
}

/// The archiver stage.
pub struct Archiver {
    consumer: Arc<dyn EventConsumer>,
    blobs: Arc<dyn BlobWriter>,
    config: ArchiverConfig,
    shutdown: Arc<AtomicBool>,
}

impl Archiver {
    /// Creates an archiver over the given capabilities.
    #[must_use]
    pub fn new(
        consumer: Arc<dyn EventConsumer>,
        blobs: Arc<dyn BlobWriter>,
        config: ArchiverConfig,
    ) -> Self {
        Self {
            consumer,
            blobs,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns a handle for requesting cancellation.
    #[must_use]
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Executes one archive run.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiverError`]; on any error the consume position has not
    /// been committed and the next run reconsumes the batch.
    pub async fn run_once(&self) -> Result<ArchiveSummary, ArchiverError> {
        info!(topic = %self.config.topic, "draining interactions");

        let mut buffers: BTreeMap<String, Vec<InteractionEvent>> = BTreeMap::new();
        let mut summary = ArchiveSummary::default();
        let mut idle = Duration::ZERO;

        while idle < self.config.idle_timeout {
            if self.shutdown.load(Ordering::SeqCst) {
                return Err(ArchiverError::Cancelled);
            }

            let record = self
                .consumer
                .poll(self.config.poll_timeout)
                .await
                .map_err(ArchiverError::Consume)?;

            let Some(record) = record else {
                idle += self.config.poll_timeout;
                continue;
            };
            idle = Duration::ZERO;

            match serde_json::from_slice::<InteractionEvent>(&record.payload) {
                Ok(event) => {
                    summary.records += 1;
                    buffers
                        .entry(event.conversation_id.clone())
                        .or_default()
                        .push(event);
                }
                Err(e) => {
                    // Poison pill: dropping it is the only way the topic
                    // keeps moving. It is committed with the batch.
                    warn!(error = %e, "dropping undecodable interaction record");
                    summary.corrupt += 1;
                }
            }
        }

        if buffers.is_empty() && summary.corrupt == 0 {
            info!("no messages to archive");
            return Ok(summary);
        }

        for (conversation_id, events) in &buffers {
            if events.is_empty() {
                continue;
            }
            let first = &events[0];
            let at = if first.has_zero_timestamp() {
                Utc::now()
            } else {
                first.timestamp
            };
            let key = raw_chunk_key(conversation_id, at);

            let mut body = Vec::new();
            for event in events {
                body.extend_from_slice(&serde_json::to_vec(event)?);
                body.push(b'\n');
            }

            self.blobs
                .write(&key, &body)
                .await
                .map_err(ArchiverError::Write)?;
            summary.conversations += 1;
        }

        self.consumer
            .commit()
            .await
            .map_err(ArchiverError::Commit)?;

        info!(
            conversations = summary.conversations,
            records = summary.records,
            corrupt = summary.corrupt,
            "archive batch committed"
        );
        Ok(summary)
    }
}
