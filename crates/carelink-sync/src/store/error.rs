//! Store client error types.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while talking to the remote message store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Rejected locally before any I/O; never retried.
    #[error("message body is empty")]
    EmptyBody,

    /// Transport-level failure (unreachable host, timeout).
    #[error("http request failed: {0}")]
    Network(#[from] reqwest::Error),

    /// The store answered with a non-success status.
    #[error("store api error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The response body did not match the expected representation.
    #[error("failed to decode store response: {0}")]
    Decode(String),
}

impl StoreError {
    /// Validation failures are surfaced immediately and must not mark a
    /// message as failed-in-flight.
    pub fn is_validation(&self) -> bool {
        matches!(self, StoreError::EmptyBody)
    }
}
