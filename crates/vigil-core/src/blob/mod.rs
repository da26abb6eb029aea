//! Blob store capability set and archive key layout.
//!
//! The archive is laid out for prefix enumeration:
//!
//! ```text
//! raw/{conversation_id}/{YYYY}/{MM}/{DD}/{HH}/chunk-{uuid}.jsonl
//! staging/{YYYY}/{MM}/{DD}/{conversation_id}.jsonl
//! results/{YYYY}/{MM}/{DD}/...            (written by the judge)
//! ```
//!
//! Chunk objects are written once and never mutated; chunk uuids guarantee
//! that a retried archiver run cannot overwrite an earlier run's output.

mod gcs;
mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use thiserror::Error;

pub use gcs::GcsClient;
pub use memory::MemoryBlobStore;

/// Top-level prefix of raw archive chunks.
pub const RAW_PREFIX: &str = "raw/";

/// Top-level prefix of staged batch inputs.
pub const STAGING_PREFIX: &str = "staging/";

/// Top-level prefix of judge outputs.
pub const RESULTS_PREFIX: &str = "results/";

/// Errors raised by blob adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BlobError {
    /// The object does not exist.
    #[error("object not found: {key}")]
    NotFound {
        /// Key that was requested.
        key: String,
    },

    /// A write was not durably persisted.
    #[error("write to {key} failed: {message}")]
    Write {
        /// Key that was being written.
        key: String,
        /// Backend-reported failure.
        message: String,
    },

    /// A read or listing failed.
    #[error("read failed: {message}")]
    Read {
        /// Backend-reported failure.
        message: String,
    },

    /// Client construction or authentication failed.
    #[error("blob store configuration error: {message}")]
    Config {
        /// What was wrong.
        message: String,
    },
}

/// Writes objects into a bucket.
#[async_trait]
pub trait BlobWriter: Send + Sync {
    /// Durably writes `data` at `key`, replacing any existing object.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::Write`] when the object is not durably
    /// persisted.
    async fn write(&self, key: &str, data: &[u8]) -> Result<(), BlobError>;
}

/// Reads and enumerates objects in a bucket.
#[async_trait]
pub trait BlobReader: Send + Sync {
    /// Reads the full content of the object at `key`.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::NotFound`] for missing objects and
    /// [`BlobError::Read`] for transport failures.
    async fn read(&self, key: &str) -> Result<Vec<u8>, BlobError>;

    /// Lists all object keys under `prefix`, lexicographically sorted.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::Read`] for transport failures.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, BlobError>;

    /// Returns the conversation ids that have at least one raw chunk on
    /// `date`.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::Read`] for transport failures.
    async fn list_active_conversations(&self, date: NaiveDate) -> Result<Vec<String>, BlobError>;

    /// Returns every chunk key of a conversation across all dates, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::Read`] for transport failures.
    async fn list_conversation_chunks(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<String>, BlobError>;
}

/// Formats a date as the `YYYY/MM/DD` archive path segment.
#[must_use]
pub fn date_prefix(date: NaiveDate) -> String {
    format!(
        "{:04}/{:02}/{:02}",
        date.year(),
        date.month(),
        date.day()
    )
}

/// Builds the key of a fresh raw chunk for `conversation_id` at hour `at`.
#[must_use]
pub fn raw_chunk_key(conversation_id: &str, at: DateTime<Utc>) -> String {
    format!(
        "{RAW_PREFIX}{conversation_id}/{:04}/{:02}/{:02}/{:02}/chunk-{}.jsonl",
        at.year(),
        at.month(),
        at.day(),
        at.hour(),
        uuid::Uuid::new_v4()
    )
}

/// Builds the staging key of a conversation's batch input line for `date`.
#[must_use]
pub fn staging_key(date: NaiveDate, conversation_id: &str) -> String {
    format!(
        "{STAGING_PREFIX}{}/{conversation_id}.jsonl",
        date_prefix(date)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_prefix_is_zero_padded() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 7).unwrap();
        assert_eq!(date_prefix(date), "2025/03/07");
    }

    #[test]
    fn test_raw_chunk_key_layout() {
        let at = "2025-12-12T10:05:00Z".parse::<DateTime<Utc>>().unwrap();
        let key = raw_chunk_key("conv-a", at);
        assert!(key.starts_with("raw/conv-a/2025/12/12/10/chunk-"));
        assert!(key.ends_with(".jsonl"));
    }

    #[test]
    fn test_raw_chunk_keys_never_collide() {
        let at = Utc::now();
        assert_ne!(raw_chunk_key("c", at), raw_chunk_key("c", at));
    }

    #[test]
    fn test_staging_key_layout() {
        let date = NaiveDate::from_ymd_opt(2025, 12, 12).unwrap();
        assert_eq!(
            staging_key(date, "conv-a"),
            "staging/2025/12/12/conv-a.jsonl"
        );
    }
}
