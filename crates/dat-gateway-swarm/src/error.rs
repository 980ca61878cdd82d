//! Swarm adapter error types.

use thiserror::Error;

/// A result type using `SwarmError`.
pub type Result<T> = std::result::Result<T, SwarmError>;

/// Errors that can occur in the swarm adapter.
#[derive(Debug, Clone, Error)]
pub enum SwarmError {
    /// The archiver could not read or write its storage directory.
    #[error("archiver storage error: {0}")]
    Storage(String),

    /// The archiver has shut down and no longer accepts operations.
    #[error("archiver closed")]
    Closed,
}

impl From<std::io::Error> for SwarmError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}
