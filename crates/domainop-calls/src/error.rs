//! Cluster API error classification.

use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

/// Errors returned by a [`crate::ClusterApi`].
///
/// The first four kinds are transient and retried with backoff. The rest
/// are final for the current reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("too many requests: {0}")]
    TooManyRequests(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    Invalid(String),
}

impl ApiError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ApiError::Timeout(_)
                | ApiError::Conflict(_)
                | ApiError::TooManyRequests(_)
                | ApiError::Unavailable(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound(_))
    }
}
