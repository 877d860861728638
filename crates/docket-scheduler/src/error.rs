//! Error types for the scheduler.

use std::fmt;

use thiserror::Error;

/// Errors that can occur in scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Store error.
    #[error("store error: {0}")]
    Store(#[from] docket_store::StoreError),

    /// The job handler reported a failure.
    #[error(transparent)]
    Handler(#[from] HandlerError),

    /// Schedule expression could not be parsed.
    #[error("invalid schedule expression: {0}")]
    InvalidSchedule(String),

    /// A record could not be converted to or from an entity.
    #[error("record conversion failed: {0}")]
    Record(#[from] serde_json::Error),

    /// Invalid scheduler configuration.
    #[error("invalid scheduler configuration: {0}")]
    InvalidConfig(String),
}

/// Failure reported by a job handler.
///
/// Only the message is kept: it ends up in the record's `lastError`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("job execution failed: {message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    /// Create a handler error from any displayable failure.
    pub fn new(message: impl fmt::Display) -> Self {
        Self {
            message: message.to_string(),
        }
    }

    /// The failure message, without the `job execution failed` prefix.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl SchedulerError {
    /// Message persisted in a record's `lastError`.
    pub fn record_message(&self) -> String {
        match self {
            SchedulerError::Handler(e) => e.message().to_string(),
            other => other.to_string(),
        }
    }
}
