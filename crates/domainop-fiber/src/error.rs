//! Fiber error types.

use thiserror::Error;

pub type FiberResult<T> = Result<T, FiberError>;

/// Errors that end a fiber.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FiberError {
    #[error("step {step} gave up after {attempts} attempts: {cause}")]
    RetriesExhausted {
        step: String,
        attempts: u32,
        cause: String,
    },

    #[error("step {step} failed: {cause}")]
    Fatal { step: String, cause: String },

    #[error("fiber {fiber} panicked: {message}")]
    Panicked { fiber: String, message: String },
}

impl FiberError {
    pub fn fatal(step: impl Into<String>, cause: impl ToString) -> Self {
        FiberError::Fatal {
            step: step.into(),
            cause: cause.to_string(),
        }
    }

    /// Whether a later reconciliation could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FiberError::Fatal { .. })
    }
}
