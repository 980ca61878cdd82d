//! The replication wire protocol.
//!
//! Peers exchange length-prefixed CBOR frames over a bidirectional byte
//! stream: a `u32` big-endian length followed by one message. A peer
//! announces the archives it can serve (`Have`), requests ones it has
//! joined but not yet materialized (`Want`), and transfers content as a
//! `Manifest` followed by one `Block` per file and a closing `Done`.
//!
//! The protocol tolerates empty replication: a stream between two peers
//! with nothing to exchange simply idles until either side closes.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::broadcast;

use dat_gateway_core::ArchiveKey;

use crate::drive::Drive;
use crate::error::{Result, SwarmError};
use crate::local::Shared;
use crate::swarm::{ReplicationStream, SwarmEvent};

/// Upper bound on a single frame, sized for one file block plus framing.
const MAX_FRAME: u32 = 16 * 1024 * 1024;

/// One replication protocol message.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) enum WireMessage {
    /// The sender can serve this archive at this version.
    Have {
        /// Archive key.
        key: ArchiveKey,
        /// Content revision offered.
        version: u64,
    },
    /// The sender wants this archive's content.
    Want {
        /// Archive key.
        key: ArchiveKey,
    },
    /// Start of an archive transfer: the file listing.
    Manifest {
        /// Archive key.
        key: ArchiveKey,
        /// Content revision being transferred.
        version: u64,
        /// `(path, size)` for every file that will follow.
        entries: Vec<(String, u64)>,
    },
    /// One file's content.
    Block {
        /// Archive key.
        key: ArchiveKey,
        /// File path within the archive.
        path: String,
        /// File payload.
        data: Vec<u8>,
    },
    /// End of an archive transfer.
    Done {
        /// Archive key.
        key: ArchiveKey,
    },
}

/// An archive transfer in progress on the receiving side.
struct Staging {
    version: u64,
    expected: usize,
    files: HashMap<String, Bytes>,
}

/// Drive one replication peer over the given stream until it closes.
pub(crate) async fn run_peer(shared: Arc<Shared>, stream: ReplicationStream) {
    if let Err(e) = peer_loop(&shared, stream).await {
        tracing::debug!(error = %e, "replication peer closed");
    }
}

async fn peer_loop(shared: &Arc<Shared>, stream: ReplicationStream) -> Result<()> {
    let (mut rd, mut wr) = tokio::io::split(stream);
    let mut events = shared.subscribe();
    let mut staging: HashMap<ArchiveKey, Staging> = HashMap::new();

    // Announce everything we can already serve.
    for drive in shared.materialized() {
        write_frame(
            &mut wr,
            &WireMessage::Have { key: drive.key(), version: drive.version() },
        )
        .await?;
    }

    loop {
        tokio::select! {
            frame = read_frame(&mut rd) => {
                let Some(msg) = frame? else {
                    return Ok(());
                };
                handle_message(shared, &mut wr, &mut staging, msg).await?;
            }
            event = events.recv() => {
                match event {
                    Ok(SwarmEvent::Materialized { key, drive }) => {
                        write_frame(
                            &mut wr,
                            &WireMessage::Have { key, version: drive.version() },
                        )
                        .await?;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "replication peer lagged on events");
                    }
                    Err(broadcast::error::RecvError::Closed) => return Ok(()),
                }
            }
        }
    }
}

async fn handle_message(
    shared: &Arc<Shared>,
    wr: &mut WriteHalf<ReplicationStream>,
    staging: &mut HashMap<ArchiveKey, Staging>,
    msg: WireMessage,
) -> Result<()> {
    match msg {
        WireMessage::Have { key, .. } => {
            if shared.wants(&key) {
                write_frame(wr, &WireMessage::Want { key }).await?;
            }
        }
        WireMessage::Want { key } => {
            if let Some(drive) = shared.drive(&key) {
                send_archive(wr, &drive).await?;
            }
        }
        WireMessage::Manifest { key, version, entries } => {
            if shared.wants(&key) {
                staging.insert(
                    key,
                    Staging {
                        version,
                        expected: entries.len(),
                        files: HashMap::with_capacity(entries.len()),
                    },
                );
            }
        }
        WireMessage::Block { key, path, data } => {
            if let Some(stage) = staging.get_mut(&key) {
                stage.files.insert(path, Bytes::from(data));
            }
        }
        WireMessage::Done { key } => {
            if let Some(stage) = staging.remove(&key) {
                if stage.files.len() == stage.expected {
                    if let Err(e) = shared.complete(key, stage.version, stage.files).await {
                        tracing::warn!(key = %key, error = %e, "failed to store replicated archive");
                    }
                } else {
                    tracing::warn!(
                        key = %key,
                        got = stage.files.len(),
                        expected = stage.expected,
                        "incomplete archive transfer dropped"
                    );
                }
            }
        }
    }
    Ok(())
}

/// Send a full archive: manifest, blocks, done.
async fn send_archive(
    wr: &mut WriteHalf<ReplicationStream>,
    drive: &crate::local::LocalDrive,
) -> Result<()> {
    let entries: Vec<(String, u64)> = drive
        .entries()
        .map(|(path, data)| (path.clone(), data.len() as u64))
        .collect();

    write_frame(
        &mut *wr,
        &WireMessage::Manifest {
            key: drive.key(),
            version: drive.version(),
            entries,
        },
    )
    .await?;

    for (path, data) in drive.entries() {
        write_frame(
            &mut *wr,
            &WireMessage::Block {
                key: drive.key(),
                path: path.clone(),
                data: data.to_vec(),
            },
        )
        .await?;
    }

    write_frame(&mut *wr, &WireMessage::Done { key: drive.key() }).await
}

/// Read one frame; `None` on a clean end-of-stream.
async fn read_frame(rd: &mut ReadHalf<ReplicationStream>) -> Result<Option<WireMessage>> {
    let len = match rd.read_u32().await {
        Ok(len) => len,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len > MAX_FRAME {
        return Err(SwarmError::Storage(format!("oversized frame: {len} bytes")));
    }
    let mut buf = vec![0u8; len as usize];
    rd.read_exact(&mut buf).await?;
    let msg = ciborium::from_reader(buf.as_slice())
        .map_err(|e| SwarmError::Storage(format!("malformed frame: {e}")))?;
    Ok(Some(msg))
}

/// Write one frame.
async fn write_frame(wr: &mut WriteHalf<ReplicationStream>, msg: &WireMessage) -> Result<()> {
    let mut buf = Vec::new();
    ciborium::into_writer(msg, &mut buf)
        .map_err(|e| SwarmError::Storage(format!("frame encode: {e}")))?;
    let len = u32::try_from(buf.len())
        .map_err(|_| SwarmError::Storage("oversized frame".to_string()))?;
    wr.write_u32(len).await?;
    wr.write_all(&buf).await?;
    wr.flush().await?;
    Ok(())
}
