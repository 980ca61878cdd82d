//! Background TTL expiry for resident archives.

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::registry::ArchiveRegistry;

/// Start the TTL sweeper for a registry, if expiry is configured.
///
/// Returns `None` unless both `ttl` and `sweep_period` are set. The sweeper
/// scans resident archives every period and removes those idle for longer
/// than the TTL. It never blocks request servicing: expired keys are
/// collected under the registry lock and removed one by one, and a key
/// being admitted concurrently is not resident yet, so it is never swept
/// mid-admission. Errors are logged and the sweep continues.
///
/// Abort the returned handle to stop sweeping.
#[must_use]
pub fn spawn_sweeper(registry: ArchiveRegistry) -> Option<JoinHandle<()>> {
    let config = registry.config();
    let (ttl, period) = match (config.ttl, config.sweep_period) {
        (Some(ttl), Some(period)) => (ttl, period),
        _ => return None,
    };

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            for key in registry.expired_keys(ttl) {
                tracing::debug!(key = %key, "expiring idle archive");
                if let Err(e) = registry.remove(&key).await {
                    tracing::warn!(key = %key, error = %e, "failed to expire archive");
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::registry::RegistryConfig;

    use super::*;

    #[tokio::test]
    async fn sweeper_requires_both_ttl_and_period() {
        let swarm = crate::registry::tests::MockSwarm::new();

        let no_ttl = ArchiveRegistry::new(
            swarm.clone(),
            RegistryConfig {
                sweep_period: Some(Duration::from_millis(10)),
                ..RegistryConfig::default()
            },
        );
        assert!(spawn_sweeper(no_ttl).is_none());

        let no_period = ArchiveRegistry::new(
            swarm,
            RegistryConfig {
                ttl: Some(Duration::from_millis(10)),
                ..RegistryConfig::default()
            },
        );
        assert!(spawn_sweeper(no_period).is_none());
    }

    #[tokio::test]
    async fn sweeper_expires_idle_archives_only() {
        let swarm = crate::registry::tests::MockSwarm::new();
        let registry = ArchiveRegistry::new(
            swarm.clone(),
            RegistryConfig {
                max: 4,
                ttl: Some(Duration::from_millis(120)),
                sweep_period: Some(Duration::from_millis(30)),
                ready_timeout: Duration::from_millis(50),
            },
        );

        let key_idle = dat_gateway_core::ArchiveKey::from_bytes([1u8; 32]);
        let key_busy = dat_gateway_core::ArchiveKey::from_bytes([2u8; 32]);
        swarm.materialize_on_join(key_idle);
        swarm.materialize_on_join(key_busy);
        registry.add(key_idle).await.unwrap();
        registry.add(key_busy).await.unwrap();

        let sweeper = spawn_sweeper(registry.clone()).unwrap();

        // Keep touching the busy key while the idle one ages out.
        for _ in 0..8 {
            tokio::time::sleep(Duration::from_millis(40)).await;
            registry.get_or_admit(key_busy).await.unwrap();
        }

        assert!(!registry.contains(&key_idle));
        assert!(registry.contains(&key_busy));

        sweeper.abort();
    }
}
