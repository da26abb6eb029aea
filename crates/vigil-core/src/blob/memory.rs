//! In-memory blob store for tests and single-process runs.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::NaiveDate;

use super::{date_prefix, BlobError, BlobReader, BlobWriter, RAW_PREFIX};

/// An in-memory object store implementing both blob capabilities.
///
/// Keys are held in a sorted map so listings are deterministic, which keeps
/// transcript reconstruction stable across test runs. Cloning shares state.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    objects: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryBlobStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every stored key, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.objects
            .read()
            .expect("lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Returns the number of stored objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.read().expect("lock poisoned").len()
    }

    /// Returns true when the store holds no objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.read().expect("lock poisoned").is_empty()
    }

    /// Makes subsequent writes fail, for error-path tests.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl BlobWriter for MemoryBlobStore {
    async fn write(&self, key: &str, data: &[u8]) -> Result<(), BlobError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(BlobError::Write {
                key: key.to_string(),
                message: "injected write failure".to_string(),
            });
        }
        self.objects
            .write()
            .expect("lock poisoned")
            .insert(key.to_string(), data.to_vec());
        Ok(())
    }
}

#[async_trait]
impl BlobReader for MemoryBlobStore {
    async fn read(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        self.objects
            .read()
            .expect("lock poisoned")
            .get(key)
            .cloned()
            .ok_or_else(|| BlobError::NotFound {
                key: key.to_string(),
            })
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, BlobError> {
        Ok(self
            .objects
            .read()
            .expect("lock poisoned")
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn list_active_conversations(&self, date: NaiveDate) -> Result<Vec<String>, BlobError> {
        let wanted = date_prefix(date);
        let objects = self.objects.read().expect("lock poisoned");

        // Key shape: raw/{conv}/YYYY/MM/DD/HH/chunk-{uuid}.jsonl
        let mut conversations = BTreeSet::new();
        for key in objects.keys() {
            let Some(rest) = key.strip_prefix(RAW_PREFIX) else {
                continue;
            };
            let mut parts = rest.splitn(2, '/');
            let (Some(conv), Some(tail)) = (parts.next(), parts.next()) else {
                continue;
            };
            if tail.starts_with(&wanted) {
                conversations.insert(conv.to_string());
            }
        }
        Ok(conversations.into_iter().collect())
    }

    async fn list_conversation_chunks(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<String>, BlobError> {
        self.list(&format!("{RAW_PREFIX}{conversation_id}/")).await
    }
}
