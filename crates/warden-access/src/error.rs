//! Error types for the access crate.

use crate::assignment::AssignmentReport;
use thiserror::Error;
use warden_store::StoreError;

/// Errors that can occur in access-control operations.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No identity, or the identity could not be resolved at all in time.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// A role lookup timed out and was downgraded to least privilege.
    #[error("role lookup degraded: {0}")]
    TimeoutDegraded(String),

    /// The requested record was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// The caller's role is below the required level.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The document store failed; retrying may succeed.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The configuration is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Some record writes of an assignment failed; the operation is safe to retry.
    #[error("assignment incomplete: {0}")]
    PartialAssignment(AssignmentReport),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl AuthError {
    /// Returns true if the caller should retry the same call.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AuthError::StoreUnavailable(_)
                | AuthError::TimeoutDegraded(_)
                | AuthError::PartialAssignment(_)
        )
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { collection, id } => {
                AuthError::NotFound(format!("{}/{}", collection, id))
            }
            StoreError::Serialization(msg) => AuthError::Serialization(msg),
            StoreError::Timeout(_)
            | StoreError::Unavailable(_)
            | StoreError::TransactionsUnsupported => AuthError::StoreUnavailable(err.to_string()),
        }
    }
}

/// Result type for access operations.
pub type Result<T> = std::result::Result<T, AuthError>;
