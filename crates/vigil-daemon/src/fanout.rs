//! Result fan-out: one finalized judge object becomes one bus event per line.
//!
//! Triggered by the object store's finalize notification for a freshly
//! written results file. Each JSONL line is republished on the results topic
//! wrapped in a [`BatchResultEvent`] with a fresh event id. The trigger layer
//! is not assumed idempotent: a retried invocation duplicates events, and the
//! extractor's content-hash sink absorbs them.
//!
//! A line that fails to parse aborts the whole call with an error so the
//! trigger retries; partially published files are the accepted cost.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use vigil_core::blob::{BlobError, BlobReader};
use vigil_core::bus::{BusError, EventPublisher, RESULTS_TOPIC};
use vigil_core::schema::{BatchResultEvent, SourceRef};

/// Errors raised while fanning out one result object.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FanoutError {
    /// The result object could not be read.
    #[error("failed to read result object: {0}")]
    Read(#[source] BlobError),

    /// A line of the object was not valid JSON.
    #[error("failed to parse result line {line}: {source}")]
    Parse {
        /// 1-based line number of the bad line.
        line: usize,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// An event could not be serialized for publication.
    #[error("failed to encode result event: {0}")]
    Encode(#[from] serde_json::Error),

    /// Publishing an event failed.
    #[error("failed to publish result event: {0}")]
    Publish(#[source] BusError),
}

/// Finalize notification for a newly completed result object.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ObjectFinalized {
    /// Bucket the object was written into.
    pub bucket: String,
    /// Object name.
    pub name: String,
}

/// The result fan-out stage.
pub struct ResultFanout {
    results: Arc<dyn BlobReader>,
    publisher: Arc<dyn EventPublisher>,
    topic: String,
}

impl ResultFanout {
    /// Creates a fan-out publishing on the default results topic.
    #[must_use]
    pub fn new(results: Arc<dyn BlobReader>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self::with_topic(results, publisher, RESULTS_TOPIC)
    }

    /// Creates a fan-out publishing on a specific topic.
    #[must_use]
    pub fn with_topic(
        results: Arc<dyn BlobReader>,
        publisher: Arc<dyn EventPublisher>,
        topic: &str,
    ) -> Self {
        Self {
            results,
            publisher,
            topic: topic.to_string(),
        }
    }

    /// Publishes one event per line of the finalized object, in file order.
    /// Returns the number of events published.
    ///
    /// # Errors
    ///
    /// Returns [`FanoutError`] on the first unreadable, unparseable or
    /// unpublishable line; earlier lines of the same file stay published.
    pub async fn process(&self, event: &ObjectFinalized) -> Result<usize, FanoutError> {
        info!(bucket = %event.bucket, file = %event.name, "processing result file");

        let data = self
            .results
            .read(&event.name)
            .await
            .map_err(FanoutError::Read)?;

        let mut count = 0usize;
        for (index, line) in data.split(|b| *b == b'\n').enumerate() {
            if line.is_empty() {
                continue;
            }
            let record: serde_json::Value =
                serde_json::from_slice(line).map_err(|source| FanoutError::Parse {
                    line: index + 1,
                    source,
                })?;

            let result_event = BatchResultEvent {
                event_id: uuid::Uuid::new_v4().to_string(),
                timestamp: Utc::now(),
                source: SourceRef {
                    bucket: event.bucket.clone(),
                    file: event.name.clone(),
                },
                record,
            };

            let payload = serde_json::to_vec(&result_event)?;
            self.publisher
                .publish(&self.topic, &result_event.event_id, &payload)
                .await
                .map_err(FanoutError::Publish)?;
            count += 1;
        }

        info!(count, file = %event.name, "result file fanned out");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use vigil_core::blob::{BlobWriter, MemoryBlobStore};
    use vigil_core::bus::MemoryBus;

    use super::*;

    const THREE_RECORDS: &str = concat!(
        r#"{"request":{"contents":[{"parts":[{"text":"transcript one"}],"role":"user"}]},"response":{"candidates":[{"content":{"parts":[{"text":"{\"is_prompt_injection\": true}"}]}}]}}"#,
        "\n",
        r#"{"request":{"contents":[{"parts":[{"text":"transcript two"}],"role":"user"}]},"response":{"candidates":[{"content":{"parts":[{"text":"{\"is_prompt_injection\": false}"}]}}]}}"#,
        "\n",
        r#"{"request":{"contents":[{"parts":[{"text":"transcript three"}],"role":"user"}]},"response":{"candidates":[{"content":{"parts":[{"text":"{\"is_prompt_injection\": false}"}]}}]}}"#,
        "\n",
    );

    fn finalized(name: &str) -> ObjectFinalized {
        ObjectFinalized {
            bucket: "output-bucket".to_string(),
            name: name.to_string(),
        }
    }

    #[tokio::test]
    async fn test_publishes_one_event_per_line_in_order() {
        let store = MemoryBlobStore::new();
        let bus = MemoryBus::new();
        store
            .write("results/2025/12/12/predictions.jsonl", THREE_RECORDS.as_bytes())
            .await
            .unwrap();

        let fanout = ResultFanout::new(Arc::new(store), Arc::new(bus.clone()));
        let count = fanout
            .process(&finalized("results/2025/12/12/predictions.jsonl"))
            .await
            .unwrap();
        assert_eq!(count, 3);

        let messages = bus.messages(RESULTS_TOPIC);
        assert_eq!(messages.len(), 3);

        let mut event_ids = HashSet::new();
        let expected_transcripts = ["transcript one", "transcript two", "transcript three"];
        for (i, message) in messages.iter().enumerate() {
            let event: BatchResultEvent = serde_json::from_slice(&message.payload).unwrap();
            // Keyed by event id, ids unique, source identical.
            assert_eq!(message.key.as_deref(), Some(event.event_id.as_str()));
            assert!(event_ids.insert(event.event_id.clone()));
            assert_eq!(event.source.bucket, "output-bucket");
            assert_eq!(event.source.file, "results/2025/12/12/predictions.jsonl");

            // Record deep-equals its source line, order matches the file.
            let text = event.record["request"]["contents"][0]["parts"][0]["text"]
                .as_str()
                .unwrap();
            assert_eq!(text, expected_transcripts[i]);
        }
    }

    #[tokio::test]
    async fn test_unparseable_line_aborts_with_line_number() {
        let store = MemoryBlobStore::new();
        let bus = MemoryBus::new();
        store
            .write("results/bad.jsonl", b"{\"ok\":1}\nnot json\n{\"ok\":3}\n")
            .await
            .unwrap();

        let fanout = ResultFanout::new(Arc::new(store), Arc::new(bus.clone()));
        let err = fanout.process(&finalized("results/bad.jsonl")).await.unwrap_err();
        assert!(matches!(err, FanoutError::Parse { line: 2, .. }));

        // The line before the bad one was already published.
        assert_eq!(bus.messages(RESULTS_TOPIC).len(), 1);
    }

    #[tokio::test]
    async fn test_missing_object_is_a_read_error() {
        let store = MemoryBlobStore::new();
        let bus = MemoryBus::new();
        let fanout = ResultFanout::new(Arc::new(store), Arc::new(bus));

        let err = fanout.process(&finalized("results/absent.jsonl")).await.unwrap_err();
        assert!(matches!(err, FanoutError::Read(_)));
    }

    #[tokio::test]
    async fn test_publish_failure_aborts() {
        let store = MemoryBlobStore::new();
        let bus = MemoryBus::new();
        store
            .write("results/r.jsonl", THREE_RECORDS.as_bytes())
            .await
            .unwrap();
        bus.set_fail_publish(true);

        let fanout = ResultFanout::new(Arc::new(store), Arc::new(bus));
        let err = fanout.process(&finalized("results/r.jsonl")).await.unwrap_err();
        assert!(matches!(err, FanoutError::Publish(_)));
    }

    #[tokio::test]
    async fn test_empty_object_publishes_nothing() {
        let store = MemoryBlobStore::new();
        let bus = MemoryBus::new();
        store.write("results/empty.jsonl", b"").await.unwrap();

        let fanout = ResultFanout::new(Arc::new(store), Arc::new(bus.clone()));
        let count = fanout.process(&finalized("results/empty.jsonl")).await.unwrap();
        assert_eq!(count, 0);
        assert!(bus.messages(RESULTS_TOPIC).is_empty());
    }
}
