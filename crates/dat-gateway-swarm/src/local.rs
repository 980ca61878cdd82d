//! Archiver implementation backed by local storage and peer replication.
//!
//! `LocalArchiver` keeps one sub-hierarchy per joined key under its storage
//! directory, named by the key's discovery hash: a `manifest.json` listing
//! the archive's files plus the file payloads themselves. Archives arrive
//! either by local import (fixtures, demos) or over a replication stream
//! from a peer that has the content.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use dat_gateway_core::ArchiveKey;

use crate::drive::{normalize_path, DirEntry, Drive, DriveError, Stat};
use crate::error::{Result, SwarmError};
use crate::protocol;
use crate::swarm::{ReplicationStream, Swarm, SwarmEvent};

/// Capacity of the materialization event channel.
const EVENT_CAPACITY: usize = 64;

/// Buffer size of replication stream halves.
const REPLICATION_BUFFER: usize = 64 * 1024;

/// On-disk archive listing.
#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    key: String,
    version: u64,
    files: Vec<ManifestEntry>,
}

/// One file in a manifest.
#[derive(Debug, Serialize, Deserialize)]
struct ManifestEntry {
    path: String,
    size: u64,
}

/// Per-key membership state.
#[derive(Clone)]
enum Slot {
    /// Joined, awaiting metadata from disk or a peer.
    Joined,
    /// Metadata and content available locally.
    Materialized(Arc<LocalDrive>),
}

/// State shared between the archiver handle and its replication peers.
pub(crate) struct Shared {
    dir: PathBuf,
    slots: RwLock<HashMap<ArchiveKey, Slot>>,
    events: broadcast::Sender<SwarmEvent>,
}

impl Shared {
    /// Directory holding one archive's feeds, named by discovery key so the
    /// public key is not exposed in the filesystem.
    fn store_path(&self, key: &ArchiveKey) -> PathBuf {
        self.dir.join(hex::encode(discovery_key(key)))
    }

    /// True if the key is joined but not yet materialized.
    pub(crate) fn wants(&self, key: &ArchiveKey) -> bool {
        matches!(self.slots.read().get(key), Some(Slot::Joined))
    }

    /// The materialized drive for a key, if any.
    pub(crate) fn drive(&self, key: &ArchiveKey) -> Option<Arc<LocalDrive>> {
        match self.slots.read().get(key) {
            Some(Slot::Materialized(drive)) => Some(Arc::clone(drive)),
            _ => None,
        }
    }

    /// All materialized drives, for peer announcement.
    pub(crate) fn materialized(&self) -> Vec<Arc<LocalDrive>> {
        self.slots
            .read()
            .values()
            .filter_map(|slot| match slot {
                Slot::Materialized(drive) => Some(Arc::clone(drive)),
                Slot::Joined => None,
            })
            .collect()
    }

    /// Subscribe to materialization events.
    pub(crate) fn subscribe(&self) -> broadcast::Receiver<SwarmEvent> {
        self.events.subscribe()
    }

    /// Install a materialized drive for a joined key, persist it, and fire
    /// the materialization event. Content for keys no longer joined is
    /// persisted but not announced.
    pub(crate) async fn complete(
        &self,
        key: ArchiveKey,
        version: u64,
        files: HashMap<String, Bytes>,
    ) -> Result<()> {
        let drive = Arc::new(LocalDrive::new(key, version, files));
        self.persist(&drive).await?;

        let mut slots = self.slots.write();
        match slots.get(&key) {
            Some(Slot::Joined) => {
                slots.insert(key, Slot::Materialized(Arc::clone(&drive)));
                drop(slots);
                self.announce(&key, drive);
            }
            Some(Slot::Materialized(_)) | None => {}
        }
        Ok(())
    }

    /// Fire a materialization event. Send failures just mean nobody is
    /// listening right now.
    fn announce(&self, key: &ArchiveKey, drive: Arc<LocalDrive>) {
        let _ = self.events.send(SwarmEvent::Materialized {
            key: *key,
            drive,
        });
    }

    /// Write an archive's manifest and payloads under the storage dir.
    async fn persist(&self, drive: &LocalDrive) -> Result<()> {
        let root = self.store_path(&drive.key);
        let content = root.join("content");
        tokio::fs::create_dir_all(&content).await?;

        let mut entries = Vec::with_capacity(drive.files.len());
        for (path, data) in &drive.files {
            let rel = safe_relative_path(path)?;
            let target = content.join(&rel);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&target, data).await?;
            entries.push(ManifestEntry {
                path: path.clone(),
                size: data.len() as u64,
            });
        }

        let manifest = Manifest {
            key: drive.key.to_hex(),
            version: drive.version,
            files: entries,
        };
        let json = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| SwarmError::Storage(e.to_string()))?;
        tokio::fs::write(root.join("manifest.json"), json).await?;
        Ok(())
    }

    /// Load a previously persisted archive, if one exists for the key.
    async fn load(&self, key: &ArchiveKey) -> Result<Option<LocalDrive>> {
        let root = self.store_path(key);
        let manifest_path = root.join("manifest.json");
        let json = match tokio::fs::read(&manifest_path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let manifest: Manifest =
            serde_json::from_slice(&json).map_err(|e| SwarmError::Storage(e.to_string()))?;

        let content = root.join("content");
        let mut files = HashMap::with_capacity(manifest.files.len());
        for entry in manifest.files {
            let rel = safe_relative_path(&entry.path)?;
            let data = tokio::fs::read(content.join(&rel)).await?;
            files.insert(entry.path, Bytes::from(data));
        }
        Ok(Some(LocalDrive::new(*key, manifest.version, files)))
    }
}

/// The local content-addressed archiver.
///
/// Cheap to clone; all clones share membership state, storage, and the
/// event channel.
#[derive(Clone)]
pub struct LocalArchiver {
    shared: Arc<Shared>,
}

impl LocalArchiver {
    /// Open an archiver over the given storage directory, creating it if
    /// needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            shared: Arc::new(Shared { dir, slots: RwLock::new(HashMap::new()), events }),
        })
    }

    /// Seed an archive from local content, persisting it and announcing
    /// materialization.
    ///
    /// Paths are normalized; the version of an imported archive is 1.
    ///
    /// # Errors
    ///
    /// Returns an error if a path is invalid or persistence fails.
    pub async fn import(
        &self,
        key: ArchiveKey,
        files: impl IntoIterator<Item = (String, Bytes)>,
    ) -> Result<()> {
        let files: HashMap<String, Bytes> = files
            .into_iter()
            .map(|(path, data)| (normalize_path(&path), data))
            .collect();

        let drive = Arc::new(LocalDrive::new(key, 1, files));
        self.shared.persist(&drive).await?;

        let mut slots = self.shared.slots.write();
        slots.insert(key, Slot::Materialized(Arc::clone(&drive)));
        drop(slots);
        self.shared.announce(&key, drive);
        Ok(())
    }
}

#[async_trait]
impl Swarm for LocalArchiver {
    async fn join(&self, key: &ArchiveKey) -> Result<()> {
        let existing = self.shared.slots.read().get(key).cloned();
        match existing {
            Some(Slot::Materialized(drive)) => {
                // Re-announce for subscribers attached after the first join.
                self.shared.announce(key, drive);
                return Ok(());
            }
            Some(Slot::Joined) => return Ok(()),
            None => {
                self.shared.slots.write().entry(*key).or_insert(Slot::Joined);
            }
        }

        match self.shared.load(key).await {
            Ok(Some(drive)) => {
                let drive = Arc::new(drive);
                let mut slots = self.shared.slots.write();
                if matches!(slots.get(key), Some(Slot::Joined)) {
                    slots.insert(*key, Slot::Materialized(Arc::clone(&drive)));
                    drop(slots);
                    self.shared.announce(key, drive);
                }
            }
            Ok(None) => {
                tracing::debug!(key = %key, "joined archive, awaiting peers");
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "failed to load persisted archive");
            }
        }
        Ok(())
    }

    async fn leave(&self, key: &ArchiveKey) -> Result<()> {
        self.shared.slots.write().remove(key);
        tracing::debug!(key = %key, "left archive swarm");
        Ok(())
    }

    fn replicate(&self) -> ReplicationStream {
        let (local, remote) = tokio::io::duplex(REPLICATION_BUFFER);
        let shared = Arc::clone(&self.shared);
        tokio::spawn(protocol::run_peer(shared, remote));
        local
    }

    fn subscribe(&self) -> broadcast::Receiver<SwarmEvent> {
        self.shared.events.subscribe()
    }
}

/// The drive view over an archive's in-memory file map.
pub(crate) struct LocalDrive {
    key: ArchiveKey,
    version: u64,
    files: HashMap<String, Bytes>,
}

impl LocalDrive {
    fn new(key: ArchiveKey, version: u64, files: HashMap<String, Bytes>) -> Self {
        Self { key, version, files }
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = (&String, &Bytes)> {
        self.files.iter()
    }

    /// True if the path names a directory implied by some file under it.
    fn is_directory(&self, path: &str) -> bool {
        if path.is_empty() {
            return true;
        }
        let prefix = format!("{path}/");
        self.files.keys().any(|p| p.starts_with(&prefix))
    }
}

#[async_trait]
impl Drive for LocalDrive {
    fn key(&self) -> ArchiveKey {
        self.key
    }

    fn version(&self) -> u64 {
        self.version
    }

    async fn stat(&self, path: &str) -> std::result::Result<Stat, DriveError> {
        let path = normalize_path(path);
        if let Some(data) = self.files.get(&path) {
            return Ok(Stat { size: data.len() as u64, is_directory: false });
        }
        if self.is_directory(&path) {
            return Ok(Stat { size: 0, is_directory: true });
        }
        Err(DriveError::NotFound(path))
    }

    async fn read_file(&self, path: &str) -> std::result::Result<Bytes, DriveError> {
        let path = normalize_path(path);
        self.files
            .get(&path)
            .cloned()
            .ok_or(DriveError::NotFound(path))
    }

    async fn read_dir(&self, path: &str) -> std::result::Result<Vec<DirEntry>, DriveError> {
        let path = normalize_path(path);
        if self.files.contains_key(&path) {
            return Err(DriveError::NotADirectory(path));
        }
        if !self.is_directory(&path) {
            return Err(DriveError::NotFound(path));
        }

        let prefix = if path.is_empty() { String::new() } else { format!("{path}/") };
        let mut entries: HashMap<String, DirEntry> = HashMap::new();
        for (file_path, data) in &self.files {
            let Some(rest) = file_path.strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('/') {
                Some((child, _)) => {
                    entries.entry(child.to_string()).or_insert(DirEntry {
                        name: child.to_string(),
                        is_directory: true,
                        size: 0,
                    });
                }
                None => {
                    entries.insert(rest.to_string(), DirEntry {
                        name: rest.to_string(),
                        is_directory: false,
                        size: data.len() as u64,
                    });
                }
            }
        }

        let mut entries: Vec<DirEntry> = entries.into_values().collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

/// The discovery hash of a public key, used for swarm lookups and on-disk
/// naming without revealing the key itself.
#[must_use]
pub fn discovery_key(key: &ArchiveKey) -> [u8; 32] {
    *blake3::keyed_hash(key.as_bytes(), b"hypercore").as_bytes()
}

/// Turn an archive path into a relative filesystem path, rejecting any
/// traversal segments.
fn safe_relative_path(path: &str) -> Result<PathBuf> {
    let normalized = normalize_path(path);
    let rel = Path::new(&normalized);
    if normalized.is_empty()
        || rel
            .components()
            .any(|c| !matches!(c, std::path::Component::Normal(_)))
    {
        return Err(SwarmError::Storage(format!("invalid archive path: {path}")));
    }
    Ok(rel.to_path_buf())
}
