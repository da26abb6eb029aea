//! Message bus capability set.
//!
//! The pipeline treats the bus as two narrow capabilities: delivery-confirmed
//! publishing keyed for partition affinity, and pull-based consumption with a
//! manual commit watermark. Stages never see client handles, only these
//! traits.
//!
//! # Commit model
//!
//! [`EventConsumer::commit`] durably records the consume position of every
//! record returned by [`EventConsumer::poll`] so far. Consumers are expected
//! to poll from a single task and call `commit` only once the side effects
//! derived from the polled records are durable - crashing before the commit
//! redelivers, which downstream idempotent sinks absorb.

mod kafka;
mod memory;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use kafka::{KafkaConsumer, KafkaPublisher, KafkaSettings};
pub use memory::{MemoryBus, MemoryConsumer};

/// Topic carrying admitted interactions, keyed by conversation id.
pub const INTERACTIONS_TOPIC: &str = "interactions";

/// Topic carrying fanned-out judge results, keyed by event id.
pub const RESULTS_TOPIC: &str = "results";

/// Consumer group of the archiver.
pub const ARCHIVER_GROUP: &str = "loader-consumer";

/// Consumer group of the injection extractor.
pub const EXTRACTOR_GROUP: &str = "extract-injections-group";

/// Errors raised by bus adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BusError {
    /// A publish was not confirmed by the broker.
    #[error("publish to topic {topic} failed: {message}")]
    Publish {
        /// Topic that was being published to.
        topic: String,
        /// Broker-reported failure.
        message: String,
    },

    /// Consuming from the subscription failed.
    #[error("consume failed: {message}")]
    Consume {
        /// Broker-reported failure.
        message: String,
    },

    /// Committing the consume position failed.
    #[error("offset commit failed: {message}")]
    Commit {
        /// Broker-reported failure.
        message: String,
    },

    /// Client construction or subscription failed.
    #[error("bus configuration error: {message}")]
    Config {
        /// What was wrong.
        message: String,
    },
}

/// One record pulled off a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusRecord {
    /// Partition key, when the producer set one.
    pub key: Option<String>,
    /// Raw record value.
    pub payload: Vec<u8>,
}

/// Publishes records onto a topic.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes `payload` on `topic` under `key` and waits for delivery
    /// confirmation.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Publish`] when the broker does not confirm
    /// delivery.
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), BusError>;
}

/// Pull-based subscription over a single topic with manual commit.
#[async_trait]
pub trait EventConsumer: Send + Sync {
    /// Waits up to `timeout` for the next record. `None` means the timeout
    /// elapsed with nothing to deliver.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Consume`] on transport failures; timeouts are not
    /// errors.
    async fn poll(&self, timeout: Duration) -> Result<Option<BusRecord>, BusError>;

    /// Durably commits the position of everything polled so far.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Commit`] when the broker rejects the commit.
    async fn commit(&self) -> Result<(), BusError>;
}
