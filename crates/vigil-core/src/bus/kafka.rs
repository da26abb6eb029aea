//! Kafka adapters backed by rdkafka.

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use secrecy::{ExposeSecret, SecretString};

use super::{BusError, BusRecord, EventConsumer, EventPublisher};

/// Broker connection settings shared by producers and consumers.
#[derive(Debug, Clone)]
pub struct KafkaSettings {
    /// Comma-separated bootstrap servers.
    pub bootstrap_servers: String,
    /// SASL/PLAIN username; when set together with `api_secret`, SASL_SSL is
    /// enabled.
    pub api_key: Option<SecretString>,
    /// SASL/PLAIN password.
    pub api_secret: Option<SecretString>,
}

impl KafkaSettings {
    /// Creates settings for an unauthenticated local broker.
    #[must_use]
    pub fn plaintext(bootstrap_servers: impl Into<String>) -> Self {
        Self {
            bootstrap_servers: bootstrap_servers.into(),
            api_key: None,
            api_secret: None,
        }
    }

    fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", &self.bootstrap_servers);
        if let (Some(key), Some(secret)) = (&self.api_key, &self.api_secret) {
            config
                .set("security.protocol", "SASL_SSL")
                .set("sasl.mechanisms", "PLAIN")
                .set("sasl.username", key.expose_secret())
                .set("sasl.password", secret.expose_secret());
        }
        config
    }
}

/// Delivery-confirmed Kafka publisher.
pub struct KafkaPublisher {
    producer: FutureProducer,
    delivery_timeout: Duration,
}

impl KafkaPublisher {
    /// Creates a publisher from broker settings.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Config`] when the client cannot be constructed.
    pub fn new(settings: &KafkaSettings) -> Result<Self, BusError> {
        let producer = settings
            .client_config()
            .create()
            .map_err(|e| BusError::Config {
                message: e.to_string(),
            })?;
        Ok(Self {
            producer,
            delivery_timeout: Duration::from_secs(30),
        })
    }
}

#[async_trait]
impl EventPublisher for KafkaPublisher {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), BusError> {
        let record = FutureRecord::to(topic).key(key).payload(payload);
        self.producer
            .send(record, Timeout::After(self.delivery_timeout))
            .await
            .map(|_| ())
            .map_err(|(e, _)| BusError::Publish {
                topic: topic.to_string(),
                message: e.to_string(),
            })
    }
}

/// Manual-commit Kafka consumer over a single topic.
///
/// Configured with `auto.offset.reset=earliest` and auto-commit disabled:
/// offsets advance only through [`EventConsumer::commit`].
pub struct KafkaConsumer {
    consumer: StreamConsumer,
}

impl KafkaConsumer {
    /// Creates a consumer in `group_id` and subscribes it to `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Config`] when the client cannot be constructed or
    /// the subscription fails.
    pub fn subscribe(
        settings: &KafkaSettings,
        group_id: &str,
        topic: &str,
    ) -> Result<Self, BusError> {
        let consumer: StreamConsumer = settings
            .client_config()
            .set("group.id", group_id)
            .set("auto.offset.reset", "earliest")
            .set("enable.auto.commit", "false")
            .create()
            .map_err(|e| BusError::Config {
                message: e.to_string(),
            })?;

        consumer.subscribe(&[topic]).map_err(|e| BusError::Config {
            message: format!("failed to subscribe to {topic}: {e}"),
        })?;

        tracing::info!(topic, group = group_id, "kafka consumer subscribed");
        Ok(Self { consumer })
    }
}

#[async_trait]
impl EventConsumer for KafkaConsumer {
    async fn poll(&self, timeout: Duration) -> Result<Option<BusRecord>, BusError> {
        match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Err(_) => Ok(None),
            Ok(Err(e)) => Err(BusError::Consume {
                message: e.to_string(),
            }),
            Ok(Ok(message)) => {
                use rdkafka::message::Message;
                let key = message
                    .key()
                    .map(|k| String::from_utf8_lossy(k).into_owned());
                let payload = message.payload().unwrap_or_default().to_vec();
                Ok(Some(BusRecord { key, payload }))
            }
        }
    }

    async fn commit(&self) -> Result<(), BusError> {
        self.consumer
            .commit_consumer_state(CommitMode::Sync)
            .map_err(|e| BusError::Commit {
                message: e.to_string(),
            })
    }
}
