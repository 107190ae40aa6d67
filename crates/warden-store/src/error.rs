//! Store error types.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during document store operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The document does not exist (only raised by operations that require it).
    #[error("not found: {collection}/{id}")]
    NotFound {
        /// Collection path.
        collection: String,
        /// Document id.
        id: String,
    },

    /// The operation did not complete within its deadline.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The store could not be reached or rejected the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A document could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The store has no multi-document transaction support.
    #[error("transactions are not supported by this store")]
    TransactionsUnsupported,
}

impl StoreError {
    /// Returns true if retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Timeout(_) | StoreError::Unavailable(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// A specialized Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
