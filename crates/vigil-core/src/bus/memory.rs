//! In-memory bus for tests and single-process runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;

use super::{BusError, BusRecord, EventConsumer, EventPublisher};

/// An in-memory topic log shared between publisher and consumer handles.
///
/// Cloning is cheap and shares state, so a test can keep one handle to seed
/// and inspect topics while a stage owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryBus {
    topics: Arc<RwLock<HashMap<String, Vec<BusRecord>>>>,
    fail_publish: Arc<AtomicBool>,
}

impl MemoryBus {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record to a topic without going through the publisher
    /// trait. Used to seed test fixtures.
    pub fn seed(&self, topic: &str, key: &str, payload: Vec<u8>) {
        let mut topics = self.topics.write().expect("lock poisoned");
        topics.entry(topic.to_string()).or_default().push(BusRecord {
            key: Some(key.to_string()),
            payload,
        });
    }

    /// Returns a copy of every record published to `topic`, in publish
    /// order.
    #[must_use]
    pub fn messages(&self, topic: &str) -> Vec<BusRecord> {
        self.topics
            .read()
            .expect("lock poisoned")
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    /// Makes subsequent publishes fail, for error-path tests.
    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Creates a consumer over `topic` starting at the earliest offset.
    #[must_use]
    pub fn consumer(&self, topic: &str) -> MemoryConsumer {
        MemoryConsumer {
            inner: Arc::new(ConsumerState {
                bus: self.clone(),
                topic: topic.to_string(),
                position: AtomicUsize::new(0),
                committed: AtomicUsize::new(0),
            }),
        }
    }
}

#[async_trait]
impl EventPublisher for MemoryBus {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), BusError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(BusError::Publish {
                topic: topic.to_string(),
                message: "injected publish failure".to_string(),
            });
        }
        self.seed(topic, key, payload.to_vec());
        Ok(())
    }
}

#[derive(Debug)]
struct ConsumerState {
    bus: MemoryBus,
    topic: String,
    position: AtomicUsize,
    committed: AtomicUsize,
}

/// Consumer handle over a [`MemoryBus`] topic.
///
/// Tracks its own consume position and committed watermark the way a real
/// consumer group does; handles are cloneable and share state so tests can
/// observe [`MemoryConsumer::committed`] after a stage has run.
#[derive(Debug, Clone)]
pub struct MemoryConsumer {
    inner: Arc<ConsumerState>,
}

impl MemoryConsumer {
    /// The number of records whose position has been durably committed.
    #[must_use]
    pub fn committed(&self) -> usize {
        self.inner.committed.load(Ordering::SeqCst)
    }

    /// The number of records polled so far.
    #[must_use]
    pub fn position(&self) -> usize {
        self.inner.position.load(Ordering::SeqCst)
    }

    fn try_next(&self) -> Option<BusRecord> {
        let topics = self.inner.bus.topics.read().expect("lock poisoned");
        let log = topics.get(&self.inner.topic)?;
        let pos = self.inner.position.load(Ordering::SeqCst);
        let record = log.get(pos)?.clone();
        self.inner.position.store(pos + 1, Ordering::SeqCst);
        Some(record)
    }
}

#[async_trait]
impl EventConsumer for MemoryConsumer {
    async fn poll(&self, timeout: Duration) -> Result<Option<BusRecord>, BusError> {
        if let Some(record) = self.try_next() {
            return Ok(Some(record));
        }
        tokio::time::sleep(timeout).await;
        Ok(self.try_next())
    }

    async fn commit(&self) -> Result<(), BusError> {
        let pos = self.inner.position.load(Ordering::SeqCst);
        self.inner.committed.store(pos, Ordering::SeqCst);
        Ok(())
    }
}
