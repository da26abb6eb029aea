//! Vector index capability set and content-addressed injection records.
//!
//! The index is text-in/text-out: the caller never sees embeddings. Queries
//! take raw text and return scored matches; upserts take records whose id is
//! a pure function of their text, so replaying an upsert is a no-op and the
//! whole downstream pipeline can be at-least-once.

mod memory;
mod pinecone;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub use memory::MemoryVectorIndex;
pub use pinecone::PineconeClient;

/// Hard ceiling on records per text-upsert call, imposed by the index's
/// integrated-inference endpoint.
pub const MAX_UPSERT_BATCH: usize = 96;

/// Errors raised by vector index adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum VectorError {
    /// A similarity query failed.
    #[error("vector query failed: {message}")]
    Query {
        /// Backend-reported failure.
        message: String,
    },

    /// An upsert was not durably applied.
    #[error("vector upsert failed: {message}")]
    Upsert {
        /// Backend-reported failure.
        message: String,
    },

    /// The caller exceeded the per-call batch ceiling.
    #[error("upsert batch of {size} exceeds the maximum of {MAX_UPSERT_BATCH}")]
    BatchTooLarge {
        /// Number of records in the rejected batch.
        size: usize,
    },

    /// Client construction or authentication failed.
    #[error("vector index configuration error: {message}")]
    Config {
        /// What was wrong.
        message: String,
    },
}

/// Computes the content-addressed id of an injection payload: lowercase hex
/// of the SHA-256 of the text.
#[must_use]
pub fn injection_id(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// A harvested injection payload as stored in the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InjectionRecord {
    /// Content-addressed record id, `hex(sha256(text))`.
    pub id: String,
    /// The injection payload itself.
    pub text: String,
    /// Provenance metadata.
    pub metadata: BTreeMap<String, String>,
}

impl InjectionRecord {
    /// Builds the record for an automatically extracted payload, stamping
    /// the standard provenance metadata.
    #[must_use]
    pub fn auto_extracted(text: &str, extracted_at: DateTime<Utc>) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert("source".to_string(), "auto-extracted".to_string());
        metadata.insert("label".to_string(), "injection".to_string());
        metadata.insert(
            "extracted_at".to_string(),
            extracted_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        );
        Self {
            id: injection_id(text),
            text: text.to_string(),
            metadata,
        }
    }
}

/// A scored similarity match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMatch {
    /// Id of the matched record.
    pub id: String,
    /// Similarity score in [0, 1], higher is closer.
    pub score: f32,
}

/// Text-in/text-out similarity index.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Returns the `top_k` closest records to `text`, best first.
    ///
    /// # Errors
    ///
    /// Returns [`VectorError::Query`] on backend failure.
    async fn query(&self, text: &str, top_k: usize) -> Result<Vec<VectorMatch>, VectorError>;

    /// Upserts up to [`MAX_UPSERT_BATCH`] records in one call. Records with
    /// an existing id replace the stored record.
    ///
    /// # Errors
    ///
    /// Returns [`VectorError::BatchTooLarge`] for oversized batches and
    /// [`VectorError::Upsert`] on backend failure.
    async fn upsert(&self, records: &[InjectionRecord]) -> Result<(), VectorError>;

    /// Fetches records by id; absent ids are silently omitted.
    ///
    /// # Errors
    ///
    /// Returns [`VectorError::Query`] on backend failure.
    async fn fetch(&self, ids: &[String]) -> Result<Vec<InjectionRecord>, VectorError>;

    /// Returns the number of records in the index.
    ///
    /// # Errors
    ///
    /// Returns [`VectorError::Query`] on backend failure.
    async fn count(&self) -> Result<u64, VectorError>;

    /// Removes every record from the index.
    ///
    /// # Errors
    ///
    /// Returns [`VectorError::Upsert`] on backend failure.
    async fn delete_all(&self) -> Result<(), VectorError>;
}
