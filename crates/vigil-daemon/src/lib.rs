//! # vigil-daemon
//!
//! The five pipeline stages of vigil, composed as a DAG over three durable
//! substrates (message bus, blob store, vector index):
//!
//! ```text
//! client --HTTP--> gate --bus:interactions--> archiver --blob:raw/--+
//!          |                                                        |
//!          v                                                        v
//!   vector index <--upsert-- extractor <--bus:results-- fanout <--blob:results/-- aggregator+judge
//! ```
//!
//! Stages own no persistent state: coupling is only through the substrates,
//! each stage runs at-least-once, and the sinks are idempotent (chunk uuids,
//! content-addressed injection ids). Every stage takes its collaborators as
//! `Arc<dyn Trait>` capabilities from `vigil-core`, so the in-memory doubles
//! drive the exact code paths production runs.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod aggregator;
pub mod archiver;
pub mod extractor;
pub mod fanout;
pub mod gate;

pub use aggregator::Aggregator;
pub use archiver::Archiver;
pub use extractor::Extractor;
pub use fanout::ResultFanout;
pub use gate::Gate;
