//! Injection extractor: results topic in, vector index out.
//!
//! Consumes fanned-out judge verdicts, and for every transcript the judge
//! flagged, runs a second single-shot LLM pass that isolates the concrete
//! injection payloads. Payloads become content-addressed records batched
//! into the vector index - which is exactly the index the ingestion gate
//! queries, closing the loop: today's confirmed attack blocks tomorrow's
//! replay.
//!
//! # Commit discipline
//!
//! The consume position is committed only after the batch holding a
//! message's derived records (or no records, for skips) has been durably
//! upserted. A flush failure aborts the run uncommitted; the content-hash
//! ids make redelivery harmless. Corrupt payloads are logged and committed
//! through - retrying a poison pill stalls the topic.
//!
//! The loop is finite by idleness: after the configured gap with no
//! messages the run flushes, commits and returns, which is what lets the
//! same code serve both scheduled batch runs and tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use vigil_core::bus::{BusError, EventConsumer, RESULTS_TOPIC};
use vigil_core::genai::{GenAiError, TextGenerator};
use vigil_core::prompt::PromptTemplate;
use vigil_core::schema::{BatchResultEvent, JudgeRecord, JudgeVerdict};
use vigil_core::vector::{InjectionRecord, VectorError, VectorIndex, MAX_UPSERT_BATCH};

/// Placeholder substituted with the flagged transcript in the extraction
/// template.
pub const TRANSCRIPT_PLACEHOLDER: &str = "transcript";

/// Errors raised by an extractor run.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExtractorError {
    /// Consuming from the bus failed.
    #[error("consumption error: {0}")]
    Consume(#[source] BusError),

    /// The extraction LLM call failed; the run aborts and the message is
    /// redelivered.
    #[error("extraction call failed: {0}")]
    Generate(#[source] GenAiError),

    /// Flushing a batch into the index failed; nothing in the batch is
    /// committed.
    #[error("batch flush failed: {0}")]
    Flush(#[source] VectorError),

    /// Committing the consume position failed.
    #[error("failed to commit offsets: {0}")]
    Commit(#[source] BusError),

    /// Strict mode: the judge flagged a transcript but extraction produced
    /// nothing; the message stays uncommitted for operator attention.
    #[error("judge-positive event {event_id} produced no injection payloads")]
    NoPayloads {
        /// Id of the offending event.
        event_id: String,
    },

    /// The run was cancelled mid-batch; pending commits were not run.
    #[error("extractor run cancelled")]
    Cancelled,
}

/// Extractor tuning knobs.
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Topic to consume.
    pub topic: String,
    /// Consecutive idle gap after which the run shuts down cleanly.
    pub idle_timeout: Duration,
    /// Upper bound on a single bus poll.
    pub poll_timeout: Duration,
    /// Records accumulated before a flush; capped by the index's per-call
    /// ceiling.
    pub batch_size: usize,
    /// Log intended upserts instead of writing, still advancing commits.
    pub dry_run: bool,
    /// Treat zero extracted payloads from a judge-positive event as a hard
    /// error instead of warn-and-commit.
    pub strict_extraction: bool,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            topic: RESULTS_TOPIC.to_string(),
            idle_timeout: Duration::from_secs(30),
            poll_timeout: Duration::from_millis(100),
            batch_size: MAX_UPSERT_BATCH,
            dry_run: false,
            strict_extraction: false,
        }
    }
}

/// Counters from one extractor run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    /// Messages consumed.
    pub consumed: usize,
    /// Messages skipped (negative verdicts, corrupt payloads, validation
    /// failures).
    pub skipped: usize,
    /// Records written to the index.
    pub upserted: usize,
    /// Judge-positive events whose extraction produced nothing.
    pub empty_extractions: usize,
}

/// Outcome of processing one message.
enum Outcome {
    /// Nothing to index; commit through.
    Skip,
    /// Judge-positive but no payloads extracted.
    Empty,
    /// Records to batch for upsert.
    Records(Vec<InjectionRecord>),
}

/// The injection extractor stage.
pub struct Extractor {
    consumer: Arc<dyn EventConsumer>,
    index: Arc<dyn VectorIndex>,
    generator: Arc<dyn TextGenerator>,
    prompt: PromptTemplate,
    config: ExtractorConfig,
    shutdown: Arc<AtomicBool>,
}

impl Extractor {
    /// Creates an extractor over the given capabilities. The prompt
    /// template's `model` field selects the extraction model.
    #[must_use]
    pub fn new(
        consumer: Arc<dyn EventConsumer>,
        index: Arc<dyn VectorIndex>,
        generator: Arc<dyn TextGenerator>,
        prompt: PromptTemplate,
        config: ExtractorConfig,
    ) -> Self {
        let config = ExtractorConfig {
            batch_size: config.batch_size.clamp(1, MAX_UPSERT_BATCH),
            ..config
        };
        Self {
            consumer,
            index,
            generator,
            prompt,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns a handle for requesting cancellation.
    #[must_use]
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Runs the consume-extract-upsert loop until the idle timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractorError`]; on any error the current batch's
    /// messages have not been committed and will be redelivered.
    pub async fn run(&self) -> Result<ExtractSummary, ExtractorError> {
        info!(
            topic = %self.config.topic,
            idle_timeout_secs = self.config.idle_timeout.as_secs(),
            dry_run = self.config.dry_run,
            "extractor starting"
        );

        let mut batch: Vec<InjectionRecord> = Vec::new();
        let mut batched_ids: HashSet<String> = HashSet::new();
        let mut pending_commits = 0usize;
        let mut summary = ExtractSummary::default();
        let mut last_message = Instant::now();

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return Err(ExtractorError::Cancelled);
            }

            let record = self
                .consumer
                .poll(self.config.poll_timeout)
                .await
                .map_err(ExtractorError::Consume)?;

            let Some(record) = record else {
                if last_message.elapsed() > self.config.idle_timeout {
                    info!(
                        idle_secs = self.config.idle_timeout.as_secs(),
                        "idle timeout reached, shutting down"
                    );
                    break;
                }
                continue;
            };
            last_message = Instant::now();
            summary.consumed += 1;

            match self.process_message(&record.payload).await? {
                Outcome::Skip => summary.skipped += 1,
                Outcome::Empty => {
                    summary.empty_extractions += 1;
                    summary.skipped += 1;
                }
                Outcome::Records(records) => {
                    if self.config.dry_run {
                        for record in &records {
                            info!(
                                id = %record.id,
                                text_len = record.text.len(),
                                "dry run: would upsert injection record"
                            );
                        }
                    } else {
                        for record in records {
                            if batched_ids.insert(record.id.clone()) {
                                batch.push(record);
                            }
                        }
                    }
                }
            }
            pending_commits += 1;

            if batch.len() >= self.config.batch_size {
                self.flush(&mut batch, &mut batched_ids, &mut pending_commits, &mut summary)
                    .await?;
            }
        }

        self.flush(&mut batch, &mut batched_ids, &mut pending_commits, &mut summary)
            .await?;

        info!(
            consumed = summary.consumed,
            skipped = summary.skipped,
            upserted = summary.upserted,
            empty_extractions = summary.empty_extractions,
            "extractor run complete"
        );
        Ok(summary)
    }

    /// Upserts the accumulated batch, then advances the commit watermark
    /// over every message processed since the last flush.
    async fn flush(
        &self,
        batch: &mut Vec<InjectionRecord>,
        batched_ids: &mut HashSet<String>,
        pending_commits: &mut usize,
        summary: &mut ExtractSummary,
    ) -> Result<(), ExtractorError> {
        if !batch.is_empty() {
            for chunk in batch.chunks(MAX_UPSERT_BATCH) {
                self.index
                    .upsert(chunk)
                    .await
                    .map_err(ExtractorError::Flush)?;
                summary.upserted += chunk.len();
            }
            info!(count = batch.len(), "upserted injection batch");
            batch.clear();
            batched_ids.clear();
        }

        if *pending_commits > 0 {
            self.consumer
                .commit()
                .await
                .map_err(ExtractorError::Commit)?;
            *pending_commits = 0;
        }
        Ok(())
    }

    /// Decodes, validates and extracts from one bus message.
    ///
    /// Corrupt or structurally invalid messages come back as
    /// [`Outcome::Skip`]; only transient downstream failures (and strict
    /// zero-payload events) escape as errors.
    async fn process_message(&self, payload: &[u8]) -> Result<Outcome, ExtractorError> {
        let event: BatchResultEvent = match serde_json::from_slice(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "dropping undecodable result event");
                return Ok(Outcome::Skip);
            }
        };

        let record: JudgeRecord = match serde_json::from_value(event.record.clone()) {
            Ok(record) => record,
            Err(e) => {
                warn!(event_id = %event.event_id, error = %e, "dropping malformed judge record");
                return Ok(Outcome::Skip);
            }
        };

        let Some(verdict_text) = record.verdict_text() else {
            warn!(
                event_id = %event.event_id,
                bucket = %event.source.bucket,
                file = %event.source.file,
                "judge record has no candidate text"
            );
            return Ok(Outcome::Skip);
        };

        let verdict = match JudgeVerdict::parse(verdict_text) {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(event_id = %event.event_id, error = %e, "failed to parse judge verdict");
                return Ok(Outcome::Skip);
            }
        };

        info!(
            event_id = %event.event_id,
            is_prompt_injection = verdict.is_prompt_injection,
            confidence = verdict.confidence,
            severity = ?verdict.severity,
            "judge verdict decoded"
        );

        if !verdict.is_prompt_injection {
            debug!(event_id = %event.event_id, "not a prompt injection, skipping");
            return Ok(Outcome::Skip);
        }

        let Some(transcript) = record.transcript_text().filter(|t| !t.is_empty()) else {
            warn!(event_id = %event.event_id, "judge record has no request transcript");
            return Ok(Outcome::Skip);
        };

        let payloads = self.extract_payloads(transcript).await?;
        if payloads.is_empty() {
            if self.config.strict_extraction {
                return Err(ExtractorError::NoPayloads {
                    event_id: event.event_id,
                });
            }
            warn!(
                event_id = %event.event_id,
                "judge-positive event produced no payloads, committing through"
            );
            return Ok(Outcome::Empty);
        }

        info!(
            event_id = %event.event_id,
            candidates = payloads.len(),
            "extraction complete"
        );

        let now = Utc::now();
        Ok(Outcome::Records(
            payloads
                .iter()
                .map(|p| InjectionRecord::auto_extracted(p, now))
                .collect(),
        ))
    }

    /// Runs the extraction prompt over a flagged transcript and splits the
    /// completion into candidate payloads: one per line, trimmed, dropping
    /// empties and the literal `None`.
    async fn extract_payloads(&self, transcript: &str) -> Result<Vec<String>, ExtractorError> {
        let prompt = self.prompt.render_flat(TRANSCRIPT_PLACEHOLDER, transcript);
        let completion = self
            .generator
            .generate(&self.prompt.model, &prompt)
            .await
            .map_err(ExtractorError::Generate)?;

        Ok(completion
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.eq_ignore_ascii_case("none"))
            .map(str::to_string)
            .collect())
    }
}
