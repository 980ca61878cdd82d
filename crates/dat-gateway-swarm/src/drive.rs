//! The read-only filesystem view of a materialized archive.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use dat_gateway_core::ArchiveKey;

/// Metadata for one archive path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    /// File size in bytes; zero for directories.
    pub size: u64,
    /// Whether the path is a directory.
    pub is_directory: bool,
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Entry name relative to the listed directory.
    pub name: String,
    /// Whether the entry is itself a directory.
    pub is_directory: bool,
    /// File size in bytes; zero for directories.
    pub size: u64,
}

/// Errors that can occur reading from a drive.
#[derive(Debug, Clone, Error)]
pub enum DriveError {
    /// The path does not exist in the archive.
    #[error("not found: {0}")]
    NotFound(String),

    /// The path exists but is not a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// The underlying storage failed.
    #[error("drive I/O error: {0}")]
    Io(String),
}

/// A materialized archive, answering file reads, stats, and listings.
///
/// Drives are immutable snapshots: `version` identifies the content
/// revision, which makes `(key, version, path)` a stable cache validator
/// for HTTP serving.
#[async_trait]
pub trait Drive: Send + Sync {
    /// The archive's public key.
    fn key(&self) -> ArchiveKey;

    /// The content revision of this view.
    fn version(&self) -> u64;

    /// Stat a path.
    ///
    /// # Errors
    ///
    /// Returns `DriveError::NotFound` if the path is absent.
    async fn stat(&self, path: &str) -> Result<Stat, DriveError>;

    /// Read a file's full contents.
    ///
    /// # Errors
    ///
    /// Returns `DriveError::NotFound` if the path is absent or is a
    /// directory.
    async fn read_file(&self, path: &str) -> Result<Bytes, DriveError>;

    /// List a directory.
    ///
    /// # Errors
    ///
    /// Returns `DriveError::NotFound` if the path is absent, or
    /// `DriveError::NotADirectory` if it names a file.
    async fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>, DriveError>;
}

/// Normalize an archive path: strip leading and trailing slashes and
/// collapse empty segments. The archive root is the empty string.
#[must_use]
pub fn normalize_path(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization() {
        assert_eq!(normalize_path("/"), "");
        assert_eq!(normalize_path(""), "");
        assert_eq!(normalize_path("/icons/favicon.ico"), "icons/favicon.ico");
        assert_eq!(normalize_path("icons//favicon.ico/"), "icons/favicon.ico");
        assert_eq!(normalize_path("./index.html"), "index.html");
    }
}
