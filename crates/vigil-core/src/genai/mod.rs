//! Hosted LLM capability set.
//!
//! Two independent capabilities: submitting batch prediction jobs (the
//! judge's workload) and single-shot text completion (the extraction pass).
//! Both are opaque to the pipeline - request in, response out, no streaming.

mod memory;
mod vertex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::{MemoryBatchClient, MemoryGenerator};
pub use vertex::VertexClient;

/// Errors raised by LLM adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GenAiError {
    /// A completion request failed.
    #[error("generation failed: {message}")]
    Generate {
        /// Provider-reported failure.
        message: String,
    },

    /// A batch job submission failed.
    #[error("batch job submission failed: {message}")]
    Submit {
        /// Provider-reported failure.
        message: String,
    },

    /// Client construction or authentication failed.
    #[error("llm provider configuration error: {message}")]
    Config {
        /// What was wrong.
        message: String,
    },
}

/// Everything needed to submit one batch prediction job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchJobSpec {
    /// Cloud project id.
    pub project: String,
    /// Provider region.
    pub location: String,
    /// Human-readable job name.
    pub display_name: String,
    /// Model id to run.
    pub model: String,
    /// JSONL input, as a `gs://` wildcard URI.
    pub input_uri: String,
    /// JSONL output destination, as a `gs://` prefix.
    pub output_uri_prefix: String,
}

impl BatchJobSpec {
    /// The provider resource parent, `projects/{project}/locations/{loc}`.
    #[must_use]
    pub fn parent(&self) -> String {
        format!("projects/{}/locations/{}", self.project, self.location)
    }
}

/// Provider-reported state of a batch job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Queued but not yet running.
    JobStatePending,
    /// Currently running.
    JobStateRunning,
    /// Finished successfully.
    JobStateSucceeded,
    /// Finished with an error.
    JobStateFailed,
    /// Any state this client does not model.
    #[serde(other)]
    JobStateUnspecified,
}

/// A submitted batch job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchJob {
    /// Fully qualified job resource name.
    pub name: String,
    /// State at submission time.
    pub state: JobState,
}

/// Submits batch prediction jobs.
#[async_trait]
pub trait BatchJobClient: Send + Sync {
    /// Submits one job and returns its resource name and initial state.
    ///
    /// # Errors
    ///
    /// Returns [`GenAiError::Submit`] when the provider rejects the job.
    async fn create_batch_job(&self, spec: &BatchJobSpec) -> Result<BatchJob, GenAiError>;
}

/// Produces single-shot text completions.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generates a completion for `prompt` with `model`.
    ///
    /// # Errors
    ///
    /// Returns [`GenAiError::Generate`] on provider failure.
    async fn generate(&self, model: &str, prompt: &str) -> Result<String, GenAiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_parent() {
        let spec = BatchJobSpec {
            project: "my-project".to_string(),
            location: "us-central1".to_string(),
            display_name: "job".to_string(),
            model: "m".to_string(),
            input_uri: "gs://in/*.jsonl".to_string(),
            output_uri_prefix: "gs://out/".to_string(),
        };
        assert_eq!(spec.parent(), "projects/my-project/locations/us-central1");
    }

    #[test]
    fn test_job_state_decodes_unknown_values() {
        let state: JobState = serde_json::from_str("\"JOB_STATE_PAUSED\"").unwrap();
        assert_eq!(state, JobState::JobStateUnspecified);
        let state: JobState = serde_json::from_str("\"JOB_STATE_PENDING\"").unwrap();
        assert_eq!(state, JobState::JobStatePending);
    }
}
