//! In-memory LLM doubles.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{BatchJob, BatchJobClient, BatchJobSpec, GenAiError, JobState, TextGenerator};

/// Batch client that records submissions and returns pending jobs.
#[derive(Debug, Clone, Default)]
pub struct MemoryBatchClient {
    submitted: Arc<Mutex<Vec<BatchJobSpec>>>,
}

impl MemoryBatchClient {
    /// Creates an empty client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every submitted spec, in submission order.
    #[must_use]
    pub fn submitted(&self) -> Vec<BatchJobSpec> {
        self.submitted.lock().expect("lock poisoned").clone()
    }
}

#[async_trait]
impl BatchJobClient for MemoryBatchClient {
    async fn create_batch_job(&self, spec: &BatchJobSpec) -> Result<BatchJob, GenAiError> {
        let mut submitted = self.submitted.lock().expect("lock poisoned");
        submitted.push(spec.clone());
        Ok(BatchJob {
            name: format!(
                "{}/batchPredictionJobs/{}",
                spec.parent(),
                uuid::Uuid::new_v4()
            ),
            state: JobState::JobStatePending,
        })
    }
}

/// Generator that replays scripted completions.
///
/// Replies are consumed front-to-back; once the script is exhausted the
/// fallback reply is returned indefinitely. Prompts are recorded for
/// assertions.
#[derive(Debug, Clone)]
pub struct MemoryGenerator {
    replies: Arc<Mutex<VecDeque<String>>>,
    fallback: String,
    prompts: Arc<Mutex<Vec<String>>>,
    fail: Arc<Mutex<bool>>,
}

impl MemoryGenerator {
    /// Creates a generator that always returns `fallback`.
    #[must_use]
    pub fn new(fallback: impl Into<String>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(VecDeque::new())),
            fallback: fallback.into(),
            prompts: Arc::new(Mutex::new(Vec::new())),
            fail: Arc::new(Mutex::new(false)),
        }
    }

    /// Queues a one-shot scripted reply.
    pub fn push_reply(&self, reply: impl Into<String>) {
        self.replies
            .lock()
            .expect("lock poisoned")
            .push_back(reply.into());
    }

    /// Returns every prompt the generator has seen.
    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("lock poisoned").clone()
    }

    /// Makes subsequent calls fail, for error-path tests.
    pub fn set_fail(&self, fail: bool) {
        *self.fail.lock().expect("lock poisoned") = fail;
    }
}

#[async_trait]
impl TextGenerator for MemoryGenerator {
    async fn generate(&self, _model: &str, prompt: &str) -> Result<String, GenAiError> {
        if *self.fail.lock().expect("lock poisoned") {
            return Err(GenAiError::Generate {
                message: "injected generation failure".to_string(),
            });
        }
        self.prompts
            .lock()
            .expect("lock poisoned")
            .push(prompt.to_string());
        let reply = self.replies.lock().expect("lock poisoned").pop_front();
        Ok(reply.unwrap_or_else(|| self.fallback.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_batch_client_records_specs() {
        let client = MemoryBatchClient::new();
        let spec = BatchJobSpec {
            project: "p".to_string(),
            location: "l".to_string(),
            display_name: "d".to_string(),
            model: "m".to_string(),
            input_uri: "gs://in/*.jsonl".to_string(),
            output_uri_prefix: "gs://out/".to_string(),
        };

        let job = client.create_batch_job(&spec).await.unwrap();
        assert!(job.name.starts_with("projects/p/locations/l/batchPredictionJobs/"));
        assert_eq!(job.state, JobState::JobStatePending);
        assert_eq!(client.submitted(), vec![spec]);
    }

    #[tokio::test]
    async fn test_generator_scripted_then_fallback() {
        let generator = MemoryGenerator::new("None");
        generator.push_reply("payload one\npayload two");

        assert_eq!(
            generator.generate("m", "first").await.unwrap(),
            "payload one\npayload two"
        );
        assert_eq!(generator.generate("m", "second").await.unwrap(), "None");
        assert_eq!(generator.prompts(), vec!["first", "second"]);
    }
}
