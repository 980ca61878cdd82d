//! The handle to one admitted archive.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use dat_gateway_core::ArchiveKey;
use dat_gateway_swarm::Drive;

/// A resident archive: its key plus the drive view, which arrives when the
/// archive's metadata materializes from the swarm.
///
/// An archive may be published before it is ready; requests can proceed
/// against it and will simply find no content until materialization. The
/// drive slot flips at most once, from `None` to `Some`.
pub struct LiveArchive {
    key: ArchiveKey,
    drive_rx: watch::Receiver<Option<Arc<dyn Drive>>>,
}

impl LiveArchive {
    /// Create an archive handle and the sender used to materialize it.
    pub(crate) fn new(key: ArchiveKey) -> (Arc<Self>, watch::Sender<Option<Arc<dyn Drive>>>) {
        let (tx, rx) = watch::channel(None);
        (Arc::new(Self { key, drive_rx: rx }), tx)
    }

    /// The archive's public key.
    #[must_use]
    pub fn key(&self) -> ArchiveKey {
        self.key
    }

    /// The materialized drive, if the archive is ready.
    #[must_use]
    pub fn drive(&self) -> Option<Arc<dyn Drive>> {
        self.drive_rx.borrow().clone()
    }

    /// Whether the archive's metadata has materialized.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.drive_rx.borrow().is_some()
    }

    /// Wait for the drive, up to `limit`. Returns the drive if the archive
    /// is (or becomes) ready within the window, `None` otherwise.
    pub async fn ready(&self, limit: Duration) -> Option<Arc<dyn Drive>> {
        let mut rx = self.drive_rx.clone();
        let wait = async {
            loop {
                if let Some(drive) = rx.borrow_and_update().clone() {
                    return Some(drive);
                }
                if rx.changed().await.is_err() {
                    // The materializer is gone; this archive will never be
                    // ready.
                    return None;
                }
            }
        };
        match tokio::time::timeout(limit, wait).await {
            Ok(drive) => drive,
            Err(_) => self.drive(),
        }
    }
}

impl std::fmt::Debug for LiveArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveArchive")
            .field("key", &self.key)
            .field("ready", &self.is_ready())
            .finish()
    }
}
