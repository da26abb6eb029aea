//! # vigil-core
//!
//! Core library for vigil - a security-analysis pipeline for conversational
//! AI traffic.
//!
//! This crate provides the building blocks shared by every pipeline stage:
//! the message model, the sliding-window scoring chunker, content-addressed
//! injection records, prompt-template handling, and the adapter capability
//! sets for the three durable substrates (message bus, blob store, vector
//! index) plus the hosted LLM provider.
//!
//! ## Adapters
//!
//! Each external system is abstracted behind a small trait so that pipeline
//! stages depend on capabilities, not clients:
//!
//! - [`bus::EventPublisher`] / [`bus::EventConsumer`] - durable topic
//!   publish/consume with manual commit
//! - [`blob::BlobWriter`] / [`blob::BlobReader`] - object store writes, reads
//!   and prefix enumeration
//! - [`vector::VectorIndex`] - text-in/text-out similarity search and
//!   content-addressed upserts
//! - [`genai::TextGenerator`] / [`genai::BatchJobClient`] - single-shot
//!   completions and batch prediction jobs
//!
//! Every adapter ships with an in-memory implementation that is a full
//! citizen, not a mock: the pipeline stages are exercised against them in
//! tests exactly as they run against the production clients.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auth;
pub mod blob;
pub mod bus;
pub mod chunk;
pub mod genai;
pub mod prompt;
pub mod schema;
pub mod vector;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::blob::{BlobReader, BlobWriter};
    pub use crate::bus::{EventConsumer, EventPublisher};
    pub use crate::genai::{BatchJobClient, TextGenerator};
    pub use crate::schema::{AnalyzeRequest, AnalyzeResponse, BatchResultEvent, InteractionEvent};
    pub use crate::vector::{InjectionRecord, VectorIndex};
}
