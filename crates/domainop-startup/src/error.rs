//! Startup planning errors.

use thiserror::Error;

pub type StartupResult<T> = Result<T, StartupError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StartupError {
    #[error("server {0} is scheduled more than once")]
    DuplicateServer(String),

    #[error("startup work item has an empty server name")]
    EmptyServerName,
}
