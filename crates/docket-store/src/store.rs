//! The contract a document store must satisfy to host scheduled jobs.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{ClaimFilter, JobId, JobPatch, JobRecord, SortOrder, StoreError};

/// Minimal store operations the scheduler relies on.
///
/// `claim_next` is the only operation with a concurrency requirement: the
/// selection and the update must be one indivisible step with respect to
/// every other caller, in this process or any other. Everything else the
/// engine does is a plain write to a record it already holds.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Name of the collection the records live in.
    fn collection(&self) -> &str;

    /// Atomically find one record matching `filter`, apply `update` to it and
    /// return the record as it was before the update.
    ///
    /// `sort` is a preference among several matches. Returns `Ok(None)` when
    /// nothing matches.
    async fn claim_next(
        &self,
        filter: &ClaimFilter,
        update: &JobPatch,
        sort: SortOrder,
    ) -> Result<Option<JobRecord>, StoreError>;

    /// Apply a partial update to the identified record.
    async fn persist(&self, id: &JobId, patch: &JobPatch) -> Result<(), StoreError>;

    /// Delete the identified record.
    async fn remove(&self, id: &JobId) -> Result<(), StoreError>;
}

#[async_trait]
impl<S: JobStore + ?Sized> JobStore for Arc<S> {
    fn collection(&self) -> &str {
        (**self).collection()
    }

    async fn claim_next(
        &self,
        filter: &ClaimFilter,
        update: &JobPatch,
        sort: SortOrder,
    ) -> Result<Option<JobRecord>, StoreError> {
        (**self).claim_next(filter, update, sort).await
    }

    async fn persist(&self, id: &JobId, patch: &JobPatch) -> Result<(), StoreError> {
        (**self).persist(id, patch).await
    }

    async fn remove(&self, id: &JobId) -> Result<(), StoreError> {
        (**self).remove(id).await
    }
}
