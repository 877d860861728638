//! In-process job store.
//!
//! Holds one collection of job records behind a single async mutex, so the
//! select-and-update of [`JobStore::claim_next`] is atomic for every task
//! sharing the store. Useful for tests, demos and single-process deployments.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::trace;

use crate::{ClaimFilter, JobId, JobPatch, JobRecord, JobStore, SortOrder, StoreError};

/// A job collection kept in memory, in insertion order.
pub struct MemoryStore {
    collection: String,
    records: Mutex<Vec<JobRecord>>,
}

impl MemoryStore {
    /// Create an empty collection.
    pub fn new(collection: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            collection: collection.into(),
            records: Mutex::new(Vec::new()),
        })
    }

    /// Name of the collection this store holds.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Insert a new record.
    pub async fn insert(&self, record: JobRecord) -> Result<JobId, StoreError> {
        let mut records = self.records.lock().await;
        if records.iter().any(|r| r.id == record.id) {
            return Err(StoreError::Conflict {
                id: record.id,
                message: "record already exists".to_string(),
            });
        }
        let id = record.id.clone();
        records.push(record);
        trace!(collection = %self.collection, id = %id, "inserted record");
        Ok(id)
    }

    /// Insert a record, replacing any record with the same id in place.
    pub async fn upsert(&self, record: JobRecord) -> JobId {
        let mut records = self.records.lock().await;
        let id = record.id.clone();
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
        trace!(collection = %self.collection, id = %id, "upserted record");
        id
    }

    /// Get a record by id.
    pub async fn get(&self, id: &JobId) -> Option<JobRecord> {
        self.records
            .lock()
            .await
            .iter()
            .find(|r| &r.id == id)
            .cloned()
    }

    /// List all records in insertion order.
    pub async fn list(&self) -> Vec<JobRecord> {
        self.records.lock().await.clone()
    }

    /// Number of records in the collection.
    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    /// Whether the collection is empty.
    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }

    fn not_found(&self, id: &JobId) -> StoreError {
        StoreError::NotFound {
            collection: self.collection.clone(),
            id: id.clone(),
        }
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn claim_next(
        &self,
        filter: &ClaimFilter,
        update: &JobPatch,
        sort: SortOrder,
    ) -> Result<Option<JobRecord>, StoreError> {
        let mut records = self.records.lock().await;

        // `min_by` keeps the first of equal candidates, i.e. insertion order.
        let selected = records
            .iter()
            .enumerate()
            .filter(|(_, r)| filter.matches(r))
            .min_by(|(_, a), (_, b)| sort.compare(a, b))
            .map(|(index, _)| index);

        let Some(index) = selected else {
            return Ok(None);
        };

        let record = &mut records[index];
        let before = record.clone();
        update.apply(&mut record.cron);
        trace!(
            collection = %self.collection,
            now = %filter.now(),
            id = %before.id,
            "claimed record"
        );
        Ok(Some(before))
    }

    async fn persist(&self, id: &JobId, patch: &JobPatch) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        let record = records
            .iter_mut()
            .find(|r| &r.id == id)
            .ok_or_else(|| self.not_found(id))?;
        patch.apply(&mut record.cron);
        trace!(collection = %self.collection, id = %id, "persisted patch");
        Ok(())
    }

    async fn remove(&self, id: &JobId) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        let index = records
            .iter()
            .position(|r| &r.id == id)
            .ok_or_else(|| self.not_found(id))?;
        records.remove(index);
        trace!(collection = %self.collection, id = %id, "removed record");
        Ok(())
    }
}
