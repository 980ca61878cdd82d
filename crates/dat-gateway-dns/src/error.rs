//! Name resolution error types.

use thiserror::Error;

/// A result type using `DnsError`.
pub type Result<T> = std::result::Result<T, DnsError>;

/// Errors that can occur during name resolution.
#[derive(Debug, Clone, Error)]
pub enum DnsError {
    /// The address is neither a key encoding nor a plausible DNS name.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// The well-known record lookup failed at the transport level.
    #[error("dat DNS lookup failed: {0}")]
    Lookup(String),

    /// The well-known record did not contain a `dat://` key.
    #[error("malformed dat DNS record for {0}")]
    BadRecord(String),
}
