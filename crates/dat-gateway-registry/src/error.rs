//! Registry error types.

use thiserror::Error;

/// A result type using `RegistryError`.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Errors that can occur in registry operations.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    /// `evict_oldest` was called on an empty cache.
    #[error("archive cache is empty")]
    Empty,

    /// An admission failed before the archive became resident.
    #[error(transparent)]
    Admission(#[from] AdmitError),

    /// The swarm adapter failed while leaving an archive.
    #[error("swarm error: {0}")]
    Swarm(String),
}

/// Errors fanned out to every waiter of one admission.
///
/// Cloneable so a single failure can resolve all attached callers.
#[derive(Debug, Clone, Error)]
pub enum AdmitError {
    /// The swarm join failed.
    #[error("swarm join failed: {0}")]
    Join(String),

    /// The admission worker went away without publishing an outcome.
    #[error("admission abandoned")]
    Abandoned,
}
