//! In-memory vector index for tests and single-process runs.
//!
//! Similarity scoring without an embedding model is necessarily artificial;
//! queries answer from a scripted response list instead. Upserts, fetches
//! and counts behave like the real index, including id-based idempotency
//! and the per-call batch ceiling.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::{InjectionRecord, VectorError, VectorIndex, VectorMatch, MAX_UPSERT_BATCH};

#[derive(Debug, Default)]
struct IndexState {
    records: BTreeMap<String, InjectionRecord>,
    responses: Vec<VectorMatch>,
    upsert_batches: Vec<Vec<String>>,
}

/// An in-memory [`VectorIndex`]. Cloning shares state.
#[derive(Debug, Clone, Default)]
pub struct MemoryVectorIndex {
    state: Arc<RwLock<IndexState>>,
    fail_queries: Arc<AtomicBool>,
    fail_upserts: Arc<AtomicBool>,
}

impl MemoryVectorIndex {
    /// Creates an empty index that answers every query with no matches.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the matches returned (truncated to `top_k`) for every
    /// subsequent query.
    pub fn set_response(&self, matches: Vec<VectorMatch>) {
        self.state.write().expect("lock poisoned").responses = matches;
    }

    /// Makes subsequent queries fail, for error-path tests.
    pub fn set_fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    /// Makes subsequent upserts fail, for error-path tests.
    pub fn set_fail_upserts(&self, fail: bool) {
        self.fail_upserts.store(fail, Ordering::SeqCst);
    }

    /// Returns the ids of each upsert call, in call order.
    #[must_use]
    pub fn upsert_batches(&self) -> Vec<Vec<String>> {
        self.state
            .read()
            .expect("lock poisoned")
            .upsert_batches
            .clone()
    }

    /// Returns a stored record by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<InjectionRecord> {
        self.state
            .read()
            .expect("lock poisoned")
            .records
            .get(id)
            .cloned()
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn query(&self, _text: &str, top_k: usize) -> Result<Vec<VectorMatch>, VectorError> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(VectorError::Query {
                message: "injected query failure".to_string(),
            });
        }
        let state = self.state.read().expect("lock poisoned");
        Ok(state.responses.iter().take(top_k).cloned().collect())
    }

    async fn upsert(&self, records: &[InjectionRecord]) -> Result<(), VectorError> {
        if records.len() > MAX_UPSERT_BATCH {
            return Err(VectorError::BatchTooLarge {
                size: records.len(),
            });
        }
        if self.fail_upserts.load(Ordering::SeqCst) {
            return Err(VectorError::Upsert {
                message: "injected upsert failure".to_string(),
            });
        }

        let mut state = self.state.write().expect("lock poisoned");
        state
            .upsert_batches
            .push(records.iter().map(|r| r.id.clone()).collect());
        for record in records {
            state.records.insert(record.id.clone(), record.clone());
        }
        Ok(())
    }

    async fn fetch(&self, ids: &[String]) -> Result<Vec<InjectionRecord>, VectorError> {
        let state = self.state.read().expect("lock poisoned");
        Ok(ids
            .iter()
            .filter_map(|id| state.records.get(id).cloned())
            .collect())
    }

    async fn count(&self) -> Result<u64, VectorError> {
        Ok(self.state.read().expect("lock poisoned").records.len() as u64)
    }

    async fn delete_all(&self) -> Result<(), VectorError> {
        self.state.write().expect("lock poisoned").records.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    #[tokio::test]
    async fn test_query_returns_scripted_matches() {
        let index = MemoryVectorIndex::new();
        assert!(index.query("anything", 1).await.unwrap().is_empty());

        index.set_response(vec![
            VectorMatch {
                id: "k".to_string(),
                score: 0.95,
            },
            VectorMatch {
                id: "j".to_string(),
                score: 0.5,
            },
        ]);

        let matches = index.query("anything", 1).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id, "k");
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent_by_id() {
        let index = MemoryVectorIndex::new();
        let record = InjectionRecord::auto_extracted("foo", Utc::now());

        index.upsert(&[record.clone()]).await.unwrap();
        index.upsert(&[record.clone()]).await.unwrap();

        assert_eq!(index.count().await.unwrap(), 1);
        assert_eq!(index.get(&record.id).unwrap().text, "foo");
    }

    #[tokio::test]
    async fn test_upsert_rejects_oversized_batch() {
        let index = MemoryVectorIndex::new();
        let records: Vec<InjectionRecord> = (0..=MAX_UPSERT_BATCH)
            .map(|i| InjectionRecord::auto_extracted(&format!("p{i}"), Utc::now()))
            .collect();

        let err = index.upsert(&records).await.unwrap_err();
        assert!(matches!(err, VectorError::BatchTooLarge { size } if size == 97));
    }

    #[tokio::test]
    async fn test_fetch_omits_absent_ids() {
        let index = MemoryVectorIndex::new();
        let record = InjectionRecord::auto_extracted("foo", Utc::now());
        index.upsert(&[record.clone()]).await.unwrap();

        let fetched = index
            .fetch(&[record.id.clone(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(fetched.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_all() {
        let index = MemoryVectorIndex::new();
        index
            .upsert(&[InjectionRecord::auto_extracted("foo", Utc::now())])
            .await
            .unwrap();
        index.delete_all().await.unwrap();
        assert_eq!(index.count().await.unwrap(), 0);
    }
}
