//! Runtime error types.

use thiserror::Error;

/// Convenience result alias.
pub type Result<T> = std::result::Result<T, RuntimeError>;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("Cannot delete while session is ongoing")]
    SessionStillRunning(String),

    #[error(transparent)]
    Client(#[from] prospect_client::ClientError),
}
