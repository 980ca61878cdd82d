//! The archive registry: bounded cache, LRU eviction, and admission.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};

use dat_gateway_core::ArchiveKey;
use dat_gateway_swarm::{Drive, Swarm, SwarmEvent};

use crate::archive::LiveArchive;
use crate::error::{AdmitError, RegistryError, Result};

/// The outcome of one admission, fanned out to every attached waiter.
type AdmitOutcome = std::result::Result<Arc<LiveArchive>, AdmitError>;

/// Configuration for the archive registry.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Maximum number of resident archives. Must be at least 1.
    pub max: usize,
    /// Idle time after which a resident archive expires. Expiry only runs
    /// when `sweep_period` is also set.
    pub ttl: Option<Duration>,
    /// Interval between expiry sweeps.
    pub sweep_period: Option<Duration>,
    /// How long an admission waits for the archive to materialize before
    /// publishing it not-yet-ready.
    pub ready_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max: 20,
            ttl: None,
            sweep_period: None,
            ready_timeout: Duration::from_secs(3),
        }
    }
}

/// Mutable registry state. One lock covers the resident/pending check,
/// capacity enforcement, eviction, and pending insertion; it is the
/// serialization point for admission and is never held across an await.
struct Inner {
    resident: HashMap<ArchiveKey, Arc<LiveArchive>>,
    pending: HashMap<ArchiveKey, watch::Receiver<Option<AdmitOutcome>>>,
    last_access: HashMap<ArchiveKey, Instant>,
}

struct Shared {
    swarm: Arc<dyn Swarm>,
    config: RegistryConfig,
    inner: Mutex<Inner>,
}

/// The bounded archive cache.
///
/// Cheap to clone; all clones share the same cache.
#[derive(Clone)]
pub struct ArchiveRegistry {
    shared: Arc<Shared>,
}

/// What `get_or_admit` decided to do while holding the lock.
enum Plan {
    Hit(Arc<LiveArchive>),
    Attach(watch::Receiver<Option<AdmitOutcome>>),
    Admit {
        evicted: Vec<ArchiveKey>,
        tx: watch::Sender<Option<AdmitOutcome>>,
        rx: watch::Receiver<Option<AdmitOutcome>>,
    },
}

impl ArchiveRegistry {
    /// Create a registry over the given swarm adapter.
    ///
    /// # Panics
    ///
    /// Panics if `config.max` is zero.
    #[must_use]
    pub fn new(swarm: Arc<dyn Swarm>, config: RegistryConfig) -> Self {
        assert!(config.max >= 1, "registry capacity must be at least 1");
        Self {
            shared: Arc::new(Shared {
                swarm,
                config,
                inner: Mutex::new(Inner {
                    resident: HashMap::new(),
                    pending: HashMap::new(),
                    last_access: HashMap::new(),
                }),
            }),
        }
    }

    /// The registry's configuration.
    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.shared.config
    }

    /// Fetch the archive for a key, admitting it if necessary.
    ///
    /// A resident archive is returned after waiting up to the readiness
    /// timeout for its drive; a not-yet-ready archive is still returned so
    /// the request can proceed (and typically answer 404). If the key is
    /// being admitted by another caller, this attaches to that admission:
    /// for any burst of concurrent callers, exactly one swarm join happens.
    ///
    /// Cancelling the returned future does not cancel the admission; the
    /// join continues so later requests for the same key benefit.
    ///
    /// # Errors
    ///
    /// Returns an error if the swarm join fails.
    pub async fn get_or_admit(&self, key: ArchiveKey) -> Result<Arc<LiveArchive>> {
        let plan = {
            let mut inner = self.shared.inner.lock();
            if let Some(archive) = inner.resident.get(&key) {
                let archive = Arc::clone(archive);
                inner.last_access.insert(key, Instant::now());
                Plan::Hit(archive)
            } else if let Some(rx) = inner.pending.get(&key) {
                Plan::Attach(rx.clone())
            } else {
                let evicted = Self::make_room(&mut inner, self.shared.config.max);
                let (tx, rx) = watch::channel(None);
                inner.pending.insert(key, rx.clone());
                Plan::Admit { evicted, tx, rx }
            }
        };

        match plan {
            Plan::Hit(archive) => {
                let _ = archive.ready(self.shared.config.ready_timeout).await;
                Ok(archive)
            }
            Plan::Attach(rx) => Self::await_outcome(rx).await,
            Plan::Admit { evicted, tx, rx } => {
                self.leave_all(&evicted).await;
                let registry = self.clone();
                tokio::spawn(async move { registry.admit(key, tx).await });
                Self::await_outcome(rx).await
            }
        }
    }

    /// Admit a key: explicit form of [`get_or_admit`](Self::get_or_admit)
    /// for callers that only care about residency.
    ///
    /// # Errors
    ///
    /// Returns an error if the swarm join fails.
    pub async fn add(&self, key: ArchiveKey) -> Result<()> {
        self.get_or_admit(key).await.map(|_| ())
    }

    /// Remove a key: leave the swarm and drop the archive. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the swarm adapter fails to leave.
    pub async fn remove(&self, key: &ArchiveKey) -> Result<()> {
        let removed = {
            let mut inner = self.shared.inner.lock();
            inner.last_access.remove(key);
            inner.resident.remove(key)
        };
        if removed.is_some() {
            self.shared
                .swarm
                .leave(key)
                .await
                .map_err(|e| RegistryError::Swarm(e.to_string()))?;
            tracing::debug!(key = %key, "removed archive");
        }
        Ok(())
    }

    /// Evict the least recently used resident archive.
    ///
    /// Ties on `last_access` are broken by key byte order.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::Empty` if nothing is resident.
    pub async fn evict_oldest(&self) -> Result<ArchiveKey> {
        let key = {
            let mut inner = self.shared.inner.lock();
            Self::pop_oldest(&mut inner).ok_or(RegistryError::Empty)?
        };
        self.leave_all(std::slice::from_ref(&key)).await;
        Ok(key)
    }

    /// Snapshot of the resident keys.
    #[must_use]
    pub fn list(&self) -> Vec<ArchiveKey> {
        self.shared.inner.lock().resident.keys().copied().collect()
    }

    /// Whether a key is resident.
    #[must_use]
    pub fn contains(&self, key: &ArchiveKey) -> bool {
        self.shared.inner.lock().resident.contains_key(key)
    }

    /// Number of resident archives.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.inner.lock().resident.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shared.inner.lock().resident.is_empty()
    }

    /// Resident keys idle for longer than `ttl`.
    #[must_use]
    pub fn expired_keys(&self, ttl: Duration) -> Vec<ArchiveKey> {
        let now = Instant::now();
        let inner = self.shared.inner.lock();
        inner
            .resident
            .keys()
            .filter(|key| {
                inner
                    .last_access
                    .get(key)
                    .is_some_and(|at| now.duration_since(*at) > ttl)
            })
            .copied()
            .collect()
    }

    /// The admission worker: joins the swarm, waits for materialization up
    /// to the readiness timeout, then moves the key from pending to
    /// resident and fans the archive out to every waiter. Runs detached
    /// from the request that started it.
    async fn admit(self, key: ArchiveKey, tx: watch::Sender<Option<AdmitOutcome>>) {
        // Subscribe before joining so the materialization event cannot be
        // missed.
        let mut events = self.shared.swarm.subscribe();

        if let Err(e) = self.shared.swarm.join(&key).await {
            tracing::warn!(key = %key, error = %e, "swarm join failed");
            self.shared.inner.lock().pending.remove(&key);
            let _ = tx.send(Some(Err(AdmitError::Join(e.to_string()))));
            return;
        }

        let (archive, drive_tx) = LiveArchive::new(key);
        let drive = wait_materialized(&mut events, key, self.shared.config.ready_timeout).await;
        let ready = drive.is_some();
        if let Some(drive) = drive {
            let _ = drive_tx.send(Some(drive));
        } else {
            tracing::debug!(key = %key, "archive not materialized within readiness window");
        }

        let evicted = {
            let mut inner = self.shared.inner.lock();
            inner.pending.remove(&key);
            // Re-check capacity: other admissions may have completed while
            // this one was waiting on the swarm.
            let evicted = Self::make_room(&mut inner, self.shared.config.max);
            inner.resident.insert(key, Arc::clone(&archive));
            inner.last_access.insert(key, Instant::now());
            evicted
        };
        self.leave_all(&evicted).await;

        let _ = tx.send(Some(Ok(Arc::clone(&archive))));

        if !ready {
            // Keep listening so a late materialization flips readiness for
            // as long as anyone holds the archive.
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        event = events.recv() => match event {
                            Ok(SwarmEvent::Materialized { key: k, drive }) if k == key => {
                                tracing::debug!(key = %key, "archive materialized late");
                                let _ = drive_tx.send(Some(drive));
                                return;
                            }
                            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                            Err(broadcast::error::RecvError::Closed) => return,
                        },
                        () = drive_tx.closed() => return,
                    }
                }
            });
        }
    }

    /// Wait on an admission outcome shared by all attached callers.
    async fn await_outcome(
        mut rx: watch::Receiver<Option<AdmitOutcome>>,
    ) -> Result<Arc<LiveArchive>> {
        loop {
            if let Some(outcome) = rx.borrow_and_update().clone() {
                return outcome.map_err(RegistryError::from);
            }
            if rx.changed().await.is_err() {
                return Err(AdmitError::Abandoned.into());
            }
        }
    }

    /// Pop resident entries until there is room for one more, oldest first.
    fn make_room(inner: &mut Inner, max: usize) -> Vec<ArchiveKey> {
        let mut evicted = Vec::new();
        while inner.resident.len() >= max {
            match Self::pop_oldest(inner) {
                Some(key) => evicted.push(key),
                None => break,
            }
        }
        evicted
    }

    /// Remove and return the least recently used resident key. The
    /// `last_access` entry goes with it.
    fn pop_oldest(inner: &mut Inner) -> Option<ArchiveKey> {
        let key = inner
            .resident
            .keys()
            .copied()
            .min_by_key(|key| (inner.last_access.get(key).copied(), *key))?;
        inner.resident.remove(&key);
        inner.last_access.remove(&key);
        Some(key)
    }

    /// Leave the swarm for evicted keys, logging failures.
    async fn leave_all(&self, keys: &[ArchiveKey]) {
        for key in keys {
            tracing::debug!(key = %key, "evicting archive");
            if let Err(e) = self.shared.swarm.leave(key).await {
                tracing::warn!(key = %key, error = %e, "failed to leave swarm for evicted archive");
            }
        }
    }
}

impl std::fmt::Debug for ArchiveRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveRegistry")
            .field("resident", &self.len())
            .field("max", &self.shared.config.max)
            .finish()
    }
}

/// Wait for the materialization event for one key, up to `limit`.
async fn wait_materialized(
    events: &mut broadcast::Receiver<SwarmEvent>,
    key: ArchiveKey,
    limit: Duration,
) -> Option<Arc<dyn Drive>> {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(SwarmEvent::Materialized { key: k, drive }) if k == key => return Some(drive),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    };
    tokio::time::timeout(limit, wait).await.ok().flatten()
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use bytes::Bytes;
    use parking_lot::RwLock;

    use dat_gateway_swarm::{DirEntry, DriveError, ReplicationStream, Stat, SwarmError};

    use super::*;

    struct MockDrive {
        key: ArchiveKey,
    }

    #[async_trait]
    impl Drive for MockDrive {
        fn key(&self) -> ArchiveKey {
            self.key
        }

        fn version(&self) -> u64 {
            1
        }

        async fn stat(&self, path: &str) -> std::result::Result<Stat, DriveError> {
            Err(DriveError::NotFound(path.to_string()))
        }

        async fn read_file(&self, path: &str) -> std::result::Result<Bytes, DriveError> {
            Err(DriveError::NotFound(path.to_string()))
        }

        async fn read_dir(&self, path: &str) -> std::result::Result<Vec<DirEntry>, DriveError> {
            Err(DriveError::NotFound(path.to_string()))
        }
    }

    /// A swarm that materializes configured keys immediately on join and
    /// counts joins and leaves.
    pub(crate) struct MockSwarm {
        auto: RwLock<HashSet<ArchiveKey>>,
        joins: AtomicUsize,
        leaves: RwLock<Vec<ArchiveKey>>,
        events: broadcast::Sender<SwarmEvent>,
    }

    impl MockSwarm {
        pub(crate) fn new() -> Arc<Self> {
            let (events, _) = broadcast::channel(64);
            Arc::new(Self {
                auto: RwLock::new(HashSet::new()),
                joins: AtomicUsize::new(0),
                leaves: RwLock::new(Vec::new()),
                events,
            })
        }

        pub(crate) fn materialize_on_join(&self, key: ArchiveKey) {
            self.auto.write().insert(key);
        }

        fn fire_materialized(&self, key: ArchiveKey) {
            let _ = self.events.send(SwarmEvent::Materialized {
                key,
                drive: Arc::new(MockDrive { key }),
            });
        }

        fn join_count(&self) -> usize {
            self.joins.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Swarm for MockSwarm {
        async fn join(&self, key: &ArchiveKey) -> std::result::Result<(), SwarmError> {
            self.joins.fetch_add(1, Ordering::SeqCst);
            if self.auto.read().contains(key) {
                self.fire_materialized(*key);
            }
            Ok(())
        }

        async fn leave(&self, key: &ArchiveKey) -> std::result::Result<(), SwarmError> {
            self.leaves.write().push(*key);
            Ok(())
        }

        fn replicate(&self) -> ReplicationStream {
            let (local, _remote) = tokio::io::duplex(1024);
            local
        }

        fn subscribe(&self) -> broadcast::Receiver<SwarmEvent> {
            self.events.subscribe()
        }
    }

    fn test_key(byte: u8) -> ArchiveKey {
        ArchiveKey::from_bytes([byte; 32])
    }

    fn fast_config(max: usize) -> RegistryConfig {
        RegistryConfig {
            max,
            ttl: None,
            sweep_period: None,
            ready_timeout: Duration::from_millis(100),
        }
    }

    #[tokio::test]
    async fn concurrent_admissions_join_once() {
        let swarm = MockSwarm::new();
        let registry = ArchiveRegistry::new(swarm.clone(), fast_config(4));
        let key = test_key(1);
        swarm.materialize_on_join(key);

        let mut handles = Vec::new();
        for _ in 0..10 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.get_or_admit(key).await.unwrap()
            }));
        }

        let mut archives = Vec::new();
        for handle in handles {
            archives.push(handle.await.unwrap());
        }

        assert_eq!(swarm.join_count(), 1);
        for archive in &archives[1..] {
            assert!(Arc::ptr_eq(&archives[0], archive));
        }
        assert!(archives[0].is_ready());
    }

    #[tokio::test]
    async fn lru_eviction_at_capacity() {
        let swarm = MockSwarm::new();
        let registry = ArchiveRegistry::new(swarm.clone(), fast_config(1));
        let key_a = test_key(1);
        let key_b = test_key(2);
        swarm.materialize_on_join(key_a);
        swarm.materialize_on_join(key_b);

        registry.get_or_admit(key_a).await.unwrap();
        assert!(registry.contains(&key_a));

        registry.get_or_admit(key_b).await.unwrap();
        assert!(!registry.contains(&key_a));
        assert!(registry.contains(&key_b));
        assert_eq!(registry.len(), 1);
        assert!(swarm.leaves.read().contains(&key_a));
    }

    #[tokio::test]
    async fn eviction_prefers_least_recently_used() {
        let swarm = MockSwarm::new();
        let registry = ArchiveRegistry::new(swarm.clone(), fast_config(2));
        let key_a = test_key(1);
        let key_b = test_key(2);
        let key_c = test_key(3);
        for key in [key_a, key_b, key_c] {
            swarm.materialize_on_join(key);
        }

        registry.get_or_admit(key_a).await.unwrap();
        registry.get_or_admit(key_b).await.unwrap();
        // Touch A so B becomes the oldest.
        registry.get_or_admit(key_a).await.unwrap();

        registry.get_or_admit(key_c).await.unwrap();
        assert!(registry.contains(&key_a));
        assert!(!registry.contains(&key_b));
        assert!(registry.contains(&key_c));
    }

    #[tokio::test]
    async fn eviction_ties_break_on_key_order() {
        let swarm = MockSwarm::new();
        let registry = ArchiveRegistry::new(swarm.clone(), fast_config(2));
        let key_a = test_key(1);
        let key_b = test_key(2);
        swarm.materialize_on_join(key_a);
        swarm.materialize_on_join(key_b);
        registry.get_or_admit(key_a).await.unwrap();
        registry.get_or_admit(key_b).await.unwrap();

        // Force identical access times.
        let now = Instant::now();
        {
            let mut inner = registry.shared.inner.lock();
            inner.last_access.insert(key_a, now);
            inner.last_access.insert(key_b, now);
        }

        let evicted = registry.evict_oldest().await.unwrap();
        assert_eq!(evicted, key_a);
    }

    #[tokio::test]
    async fn evict_oldest_on_empty_cache_fails() {
        let swarm = MockSwarm::new();
        let registry = ArchiveRegistry::new(swarm, fast_config(1));
        assert!(matches!(
            registry.evict_oldest().await,
            Err(RegistryError::Empty)
        ));
    }

    #[tokio::test]
    async fn remove_then_admit_rejoins() {
        let swarm = MockSwarm::new();
        let registry = ArchiveRegistry::new(swarm.clone(), fast_config(2));
        let key = test_key(1);
        swarm.materialize_on_join(key);

        registry.add(key).await.unwrap();
        assert!(registry.contains(&key));

        registry.remove(&key).await.unwrap();
        assert!(!registry.contains(&key));
        assert!(swarm.leaves.read().contains(&key));

        registry.add(key).await.unwrap();
        assert!(registry.contains(&key));
        assert_eq!(swarm.join_count(), 2);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let swarm = MockSwarm::new();
        let registry = ArchiveRegistry::new(swarm, fast_config(1));
        registry.remove(&test_key(1)).await.unwrap();
        registry.remove(&test_key(1)).await.unwrap();
    }

    #[tokio::test]
    async fn capacity_invariant_under_churn() {
        let swarm = MockSwarm::new();
        let registry = ArchiveRegistry::new(swarm.clone(), fast_config(2));
        for byte in 1..=6 {
            let key = test_key(byte);
            swarm.materialize_on_join(key);
            registry.get_or_admit(key).await.unwrap();
            assert!(registry.len() <= 2);
        }
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn readiness_timeout_publishes_not_ready_archive() {
        let swarm = MockSwarm::new();
        let registry = ArchiveRegistry::new(swarm.clone(), fast_config(2));
        let key = test_key(1);

        // Never materialized: the dead-address case.
        let archive = registry.get_or_admit(key).await.unwrap();
        assert!(!archive.is_ready());
        assert!(archive.drive().is_none());
        assert!(registry.contains(&key));
        assert_eq!(swarm.join_count(), 1);
    }

    #[tokio::test]
    async fn late_materialization_flips_readiness() {
        let swarm = MockSwarm::new();
        let registry = ArchiveRegistry::new(swarm.clone(), fast_config(2));
        let key = test_key(1);

        let archive = registry.get_or_admit(key).await.unwrap();
        assert!(!archive.is_ready());

        swarm.fire_materialized(key);
        let drive = archive.ready(Duration::from_secs(1)).await;
        assert!(drive.is_some());
        assert!(archive.is_ready());
    }

    #[tokio::test]
    async fn admission_never_leaves_key_both_resident_and_pending() {
        let swarm = MockSwarm::new();
        let registry = ArchiveRegistry::new(swarm.clone(), fast_config(2));
        let key = test_key(1);
        swarm.materialize_on_join(key);
        registry.get_or_admit(key).await.unwrap();

        let inner = registry.shared.inner.lock();
        assert!(inner.resident.contains_key(&key));
        assert!(!inner.pending.contains_key(&key));
        assert!(inner.last_access.contains_key(&key));
    }

    #[tokio::test]
    async fn expired_keys_respect_ttl() {
        let swarm = MockSwarm::new();
        let registry = ArchiveRegistry::new(swarm.clone(), fast_config(4));
        let key = test_key(1);
        swarm.materialize_on_join(key);
        registry.get_or_admit(key).await.unwrap();

        assert!(registry.expired_keys(Duration::from_secs(60)).is_empty());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(registry.expired_keys(Duration::from_millis(10)), vec![key]);
    }

    #[tokio::test]
    async fn list_snapshots_resident_keys() {
        let swarm = MockSwarm::new();
        let registry = ArchiveRegistry::new(swarm.clone(), fast_config(4));
        assert!(registry.is_empty());

        for byte in 1..=3 {
            let key = test_key(byte);
            swarm.materialize_on_join(key);
            registry.add(key).await.unwrap();
        }

        let mut keys = registry.list();
        keys.sort();
        assert_eq!(keys, vec![test_key(1), test_key(2), test_key(3)]);
    }
}
