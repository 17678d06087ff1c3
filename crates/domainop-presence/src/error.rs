//! Presence error types.

use domainop_fiber::FiberError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PresenceError {
    #[error("status write failed for {domain}: {cause}")]
    StatusWrite { domain: String, cause: String },

    #[error("namespace listing failed: {0}")]
    Namespaces(#[from] FiberError),

    #[error("namespace listing was cancelled")]
    Cancelled,
}

pub type PresenceResult<T> = Result<T, PresenceError>;
