//! Error types for job stores.

use thiserror::Error;

use crate::JobId;

/// Errors that can occur when reading or writing job records.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Record not found.
    #[error("job not found: {collection}/{id}")]
    NotFound { collection: String, id: JobId },

    /// The store could not be reached or refused the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A write conflicted with the current state of the record.
    #[error("write conflict on {id}: {message}")]
    Conflict { id: JobId, message: String },

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),
}
