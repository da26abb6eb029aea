//! Daily aggregator and judge dispatcher.
//!
//! For a target date, enumerates the conversations that were active that
//! day, rebuilds each one's *full* transcript (all dates, not just the
//! day's slice - the judge needs conversational context), renders the judge
//! prompt template around it, stages one JSONL request object per
//! conversation, and submits a single batch prediction job over the staged
//! prefix wildcard.
//!
//! Per-conversation failures are logged and skipped; the run fails only if
//! listing or submission fails. Zero staged conversations means no job.

use std::sync::Arc;

use chrono::NaiveDate;
use thiserror::Error;
use tracing::{error, info};

use vigil_core::blob::{date_prefix, staging_key, BlobError, BlobReader, BlobWriter};
use vigil_core::genai::{BatchJob, BatchJobClient, BatchJobSpec, GenAiError};
use vigil_core::prompt::PromptTemplate;
use vigil_core::schema::{BatchRequestBody, BatchRequestLine};

/// Placeholder substituted with the transcript in the judge template.
pub const TRANSCRIPT_PLACEHOLDER: &str = "conversation_transcript";

/// Errors raised by an aggregator run.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AggregatorError {
    /// Enumerating the archive failed.
    #[error("failed to list archive: {0}")]
    List(#[source] BlobError),

    /// Submitting the batch job failed.
    #[error("failed to submit batch job: {0}")]
    Submit(#[source] GenAiError),
}

/// Identity of the batch workload.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Cloud project id.
    pub project: String,
    /// Provider region.
    pub location: String,
    /// Bucket holding staged batch inputs.
    pub staging_bucket: String,
    /// Bucket the judge writes results into.
    pub output_bucket: String,
    /// Judge model id.
    pub model: String,
}

/// The aggregator stage.
pub struct Aggregator {
    archive: Arc<dyn BlobReader>,
    staging: Arc<dyn BlobWriter>,
    jobs: Arc<dyn BatchJobClient>,
    prompt: PromptTemplate,
    config: AggregatorConfig,
}

impl Aggregator {
    /// Creates an aggregator over the given capabilities.
    #[must_use]
    pub fn new(
        archive: Arc<dyn BlobReader>,
        staging: Arc<dyn BlobWriter>,
        jobs: Arc<dyn BatchJobClient>,
        prompt: PromptTemplate,
        config: AggregatorConfig,
    ) -> Self {
        Self {
            archive,
            staging,
            jobs,
            prompt,
            config,
        }
    }

    /// Runs the aggregation for `date`. Returns the submitted job, or
    /// `None` when no conversation produced a staged request.
    ///
    /// # Errors
    ///
    /// Returns [`AggregatorError`] when the archive cannot be enumerated or
    /// the job submission fails.
    pub async fn run(&self, date: NaiveDate) -> Result<Option<BatchJob>, AggregatorError> {
        info!(%date, "starting daily batch aggregation");

        let conversations = self
            .archive
            .list_active_conversations(date)
            .await
            .map_err(AggregatorError::List)?;
        info!(count = conversations.len(), "found active conversations");

        let mut staged = 0usize;
        for conversation_id in &conversations {
            match self.stage_conversation(conversation_id, date).await {
                Ok(true) => staged += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(
                        conversation_id = %conversation_id,
                        error = %e,
                        "failed to stage conversation, skipping"
                    );
                }
            }
        }

        if staged == 0 {
            info!("no conversations to judge");
            return Ok(None);
        }

        let job = self.submit(date, staged).await?;
        Ok(Some(job))
    }

    /// Reconstructs, renders and uploads one conversation's batch request.
    /// Returns false when the conversation had no transcript to stage.
    async fn stage_conversation(
        &self,
        conversation_id: &str,
        date: NaiveDate,
    ) -> Result<bool, StageError> {
        let transcript = self.reconstruct_transcript(conversation_id).await?;
        if transcript.trim().is_empty() {
            return Ok(false);
        }

        let messages = self.prompt.render(TRANSCRIPT_PLACEHOLDER, &transcript);
        let line = BatchRequestLine {
            request: BatchRequestBody::from_messages(&messages),
        };
        let data = line.to_jsonl()?;

        let key = staging_key(date, conversation_id);
        self.staging.write(&key, &data).await?;
        Ok(true)
    }

    /// Concatenates all of a conversation's chunk bodies, across dates, in
    /// listing order with `\n` separators.
    async fn reconstruct_transcript(&self, conversation_id: &str) -> Result<String, StageError> {
        let chunks = self
            .archive
            .list_conversation_chunks(conversation_id)
            .await?;

        let mut transcript = String::new();
        for key in &chunks {
            let data = self.archive.read(key).await?;
            transcript.push_str(&String::from_utf8_lossy(&data));
            transcript.push('\n');
        }
        Ok(transcript)
    }

    async fn submit(&self, date: NaiveDate, staged: usize) -> Result<BatchJob, AggregatorError> {
        let day = date_prefix(date);
        let spec = BatchJobSpec {
            project: self.config.project.clone(),
            location: self.config.location.clone(),
            display_name: format!("security-judge-{}", date.format("%Y-%m-%d")),
            model: self.config.model.clone(),
            input_uri: format!("gs://{}/staging/{day}/*.jsonl", self.config.staging_bucket),
            output_uri_prefix: format!("gs://{}/results/{day}/", self.config.output_bucket),
        };

        info!(
            input = %spec.input_uri,
            output = %spec.output_uri_prefix,
            conversations = staged,
            "submitting batch prediction job"
        );

        let job = self
            .jobs
            .create_batch_job(&spec)
            .await
            .map_err(AggregatorError::Submit)?;
        info!(job = %job.name, state = ?job.state, "batch job submitted");
        Ok(job)
    }
}

/// Per-conversation failure; logged and skipped by the run loop.
#[derive(Debug, Error)]
enum StageError {
    #[error("archive access failed: {0}")]
    Blob(#[from] BlobError),

    #[error("failed to encode batch request: {0}")]
    Encode(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use vigil_core::blob::MemoryBlobStore;
    use vigil_core::genai::MemoryBatchClient;
    use vigil_core::prompt::PromptMessage;

    use super::*;

    fn judge_prompt() -> PromptTemplate {
        PromptTemplate {
            name: "judge".to_string(),
            description: String::new(),
            model: "gemini-2.5-flash-lite".to_string(),
            messages: vec![
                PromptMessage {
                    role: "system".to_string(),
                    content: "You are a security judge.".to_string(),
                },
                PromptMessage {
                    role: "user".to_string(),
                    content: "Analyze this transcript:\n\n{{conversation_transcript}}".to_string(),
                },
            ],
        }
    }

    fn test_config() -> AggregatorConfig {
        AggregatorConfig {
            project: "my-project".to_string(),
            location: "us-central1".to_string(),
            staging_bucket: "staging-bucket".to_string(),
            output_bucket: "output-bucket".to_string(),
            model: "gemini-2.5-flash-lite".to_string(),
        }
    }

    fn aggregator(
        archive: &MemoryBlobStore,
        staging: &MemoryBlobStore,
        jobs: &MemoryBatchClient,
    ) -> Aggregator {
        Aggregator::new(
            Arc::new(archive.clone()),
            Arc::new(staging.clone()),
            Arc::new(jobs.clone()),
            judge_prompt(),
            test_config(),
        )
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 12, 12).unwrap()
    }

    #[tokio::test]
    async fn test_stages_one_object_and_submits_one_job() {
        let archive = MemoryBlobStore::new();
        let staging = MemoryBlobStore::new();
        let jobs = MemoryBatchClient::new();

        archive
            .write("raw/conv-a/2025/12/12/10/chunk-1.jsonl", b"turn one\n")
            .await
            .unwrap();
        archive
            .write("raw/conv-a/2025/12/12/11/chunk-1.jsonl", b"turn two\n")
            .await
            .unwrap();

        let job = aggregator(&archive, &staging, &jobs)
            .run(date())
            .await
            .unwrap();
        assert!(job.is_some());

        // Exactly one staged object for the conversation.
        assert_eq!(staging.keys(), vec!["staging/2025/12/12/conv-a.jsonl"]);

        let body = staging
            .read("staging/2025/12/12/conv-a.jsonl")
            .await
            .unwrap();
        let text = String::from_utf8(body).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.ends_with('\n'));

        let line: serde_json::Value = serde_json::from_str(text.trim_end()).unwrap();
        let request = &line["request"];
        assert_eq!(
            request["system_instruction"]["parts"][0]["text"],
            "You are a security judge."
        );
        let user_text = request["contents"][0]["parts"][0]["text"].as_str().unwrap();
        assert!(user_text.contains("turn one\n"));
        assert!(user_text.contains("turn two\n"));

        // Exactly one submission with the wildcard input and dated output.
        let submitted = jobs.submitted();
        assert_eq!(submitted.len(), 1);
        let spec = &submitted[0];
        assert_eq!(spec.display_name, "security-judge-2025-12-12");
        assert_eq!(spec.parent(), "projects/my-project/locations/us-central1");
        assert_eq!(
            spec.input_uri,
            "gs://staging-bucket/staging/2025/12/12/*.jsonl"
        );
        assert_eq!(
            spec.output_uri_prefix,
            "gs://output-bucket/results/2025/12/12/"
        );
        assert_eq!(spec.model, "gemini-2.5-flash-lite");
    }

    #[tokio::test]
    async fn test_transcript_spans_all_dates_for_active_conversation() {
        let archive = MemoryBlobStore::new();
        let staging = MemoryBlobStore::new();
        let jobs = MemoryBatchClient::new();

        // Active on the target date, but with history from the day before.
        archive
            .write("raw/conv-a/2025/12/11/09/chunk-1.jsonl", b"earlier\n")
            .await
            .unwrap();
        archive
            .write("raw/conv-a/2025/12/12/10/chunk-1.jsonl", b"today\n")
            .await
            .unwrap();

        aggregator(&archive, &staging, &jobs)
            .run(date())
            .await
            .unwrap();

        let body = staging
            .read("staging/2025/12/12/conv-a.jsonl")
            .await
            .unwrap();
        let text = String::from_utf8(body).unwrap();
        assert!(text.contains("earlier"));
        assert!(text.contains("today"));
    }

    #[tokio::test]
    async fn test_inactive_conversations_are_not_staged() {
        let archive = MemoryBlobStore::new();
        let staging = MemoryBlobStore::new();
        let jobs = MemoryBatchClient::new();

        archive
            .write("raw/conv-b/2025/12/11/09/chunk-1.jsonl", b"yesterday only\n")
            .await
            .unwrap();

        let job = aggregator(&archive, &staging, &jobs)
            .run(date())
            .await
            .unwrap();
        assert!(job.is_none());
        assert!(staging.is_empty());
        assert!(jobs.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_empty_archive_submits_nothing() {
        let archive = MemoryBlobStore::new();
        let staging = MemoryBlobStore::new();
        let jobs = MemoryBatchClient::new();

        let job = aggregator(&archive, &staging, &jobs)
            .run(date())
            .await
            .unwrap();
        assert!(job.is_none());
        assert!(jobs.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_empty_transcripts_are_skipped() {
        let archive = MemoryBlobStore::new();
        let staging = MemoryBlobStore::new();
        let jobs = MemoryBatchClient::new();

        archive
            .write("raw/conv-a/2025/12/12/10/chunk-1.jsonl", b"")
            .await
            .unwrap();

        let job = aggregator(&archive, &staging, &jobs)
            .run(date())
            .await
            .unwrap();
        assert!(job.is_none());
        assert!(staging.is_empty());
    }

    #[tokio::test]
    async fn test_staging_failure_skips_conversation_but_run_continues() {
        let archive = MemoryBlobStore::new();
        let staging = MemoryBlobStore::new();
        let jobs = MemoryBatchClient::new();

        archive
            .write("raw/conv-a/2025/12/12/10/chunk-1.jsonl", b"content\n")
            .await
            .unwrap();

        staging.set_fail_writes(true);
        let job = aggregator(&archive, &staging, &jobs)
            .run(date())
            .await
            .unwrap();
        // The only conversation failed to stage, so there is no job.
        assert!(job.is_none());
        assert!(jobs.submitted().is_empty());
    }
}
