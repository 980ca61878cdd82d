//! The swarm adapter trait and its events.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use dat_gateway_core::ArchiveKey;

use crate::drive::Drive;
use crate::error::Result;

/// A bidirectional framed byte stream carrying the replication protocol.
///
/// The gateway treats the contents as opaque: the WebSocket front end pipes
/// these bytes to and from browser peers without inspecting them.
pub type ReplicationStream = tokio::io::DuplexStream;

/// Events emitted by the swarm adapter.
#[derive(Clone)]
pub enum SwarmEvent {
    /// An archive's metadata is available locally and the archive can now
    /// serve reads through the attached drive.
    Materialized {
        /// The archive's public key.
        key: ArchiveKey,
        /// The materialized drive view.
        drive: Arc<dyn Drive>,
    },
}

impl fmt::Debug for SwarmEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Materialized { key, .. } => {
                f.debug_struct("Materialized").field("key", key).finish()
            }
        }
    }
}

/// The external archiver and its peer swarm, behind a narrow interface.
///
/// The adapter owns swarm membership and the per-archive peer sets; it is
/// the only concurrency-safe way to observe that an archive is ready to
/// serve reads. Front ends and the registry never reach past it.
#[async_trait]
pub trait Swarm: Send + Sync {
    /// Begin replicating an archive. Idempotent.
    ///
    /// If the archive's metadata is (or becomes) available, a
    /// [`SwarmEvent::Materialized`] event fires for the key; subscribe
    /// before calling `join` to avoid missing it.
    ///
    /// # Errors
    ///
    /// Returns an error if the archiver's storage fails.
    async fn join(&self, key: &ArchiveKey) -> Result<()>;

    /// Stop replicating an archive and close its peers.
    ///
    /// # Errors
    ///
    /// Returns an error if the archiver's storage fails.
    async fn leave(&self, key: &ArchiveKey) -> Result<()>;

    /// Open a replication stream suitable for proxying a remote peer.
    fn replicate(&self) -> ReplicationStream;

    /// Subscribe to swarm events.
    fn subscribe(&self) -> broadcast::Receiver<SwarmEvent>;
}
