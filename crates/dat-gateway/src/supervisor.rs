//! Gateway construction, startup, and shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use dat_gateway_dns::Resolver;
use dat_gateway_registry::{spawn_sweeper, ArchiveRegistry};
use dat_gateway_swarm::{LocalArchiver, Swarm, SwarmError};

use crate::config::GatewayConfig;
use crate::routes::create_router;
use crate::state::GatewayState;

/// How long `close` waits for in-flight requests before aborting them.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// The gateway supervisor: owns the listener, the registry, the swarm
/// adapter, and the TTL sweeper, and sequences startup and shutdown.
pub struct Gateway {
    state: GatewayState,
    sweeper: Option<JoinHandle<()>>,
    server: Option<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
    local_addr: Option<SocketAddr>,
}

impl Gateway {
    /// Construct the gateway: open the archiver over the configured storage
    /// directory, build the registry, and start the TTL sweeper when
    /// configured. The listener is not bound until [`listen`](Self::listen).
    ///
    /// # Errors
    ///
    /// Returns an error if the storage directory cannot be opened.
    pub fn load(config: GatewayConfig) -> Result<Self, SwarmError> {
        let archiver = LocalArchiver::open(&config.dir)?;
        let swarm: Arc<dyn Swarm> = Arc::new(archiver);
        let resolver = Arc::new(Resolver::new());
        let registry = ArchiveRegistry::new(Arc::clone(&swarm), config.registry_config());
        let sweeper = spawn_sweeper(registry.clone());
        let (shutdown, _) = watch::channel(false);

        let state = GatewayState::new(registry, swarm, resolver, config);
        Ok(Self {
            state,
            sweeper,
            server: None,
            shutdown,
            local_addr: None,
        })
    }

    /// Bind the listener and start serving in the background.
    ///
    /// Returns the bound address, which carries the actual port when 0 was
    /// requested.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn listen(&mut self, addr: SocketAddr) -> std::io::Result<SocketAddr> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let app = create_router(self.state.clone());
        let mut shutdown = self.shutdown.subscribe();

        self.server = Some(tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            });
            if let Err(e) = serve.await {
                tracing::error!(error = %e, "server error");
            }
        }));
        self.local_addr = Some(local_addr);
        tracing::info!(addr = %local_addr, "gateway listening");
        Ok(local_addr)
    }

    /// The bound listener address, if [`listen`](Self::listen) succeeded.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// The archive registry.
    #[must_use]
    pub fn registry(&self) -> &ArchiveRegistry {
        &self.state.registry
    }

    /// The swarm adapter.
    #[must_use]
    pub fn swarm(&self) -> &Arc<dyn Swarm> {
        &self.state.swarm
    }

    /// Shut down: stop accepting connections, cancel the sweeper, drain
    /// in-flight requests best-effort, and remove every resident archive,
    /// leaving its swarm. Safe to call more than once.
    pub async fn close(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
        if let Some(server) = self.server.take() {
            // Long-lived replication sockets can hold the drain open
            // forever; give them a grace period and cut them loose.
            let abort = server.abort_handle();
            match tokio::time::timeout(DRAIN_TIMEOUT, server).await {
                Ok(Err(e)) if !e.is_cancelled() => {
                    tracing::warn!(error = %e, "server task failed during shutdown");
                }
                Ok(_) => {}
                Err(_) => {
                    tracing::debug!("drain timed out, aborting remaining connections");
                    abort.abort();
                }
            }
        }
        for key in self.state.registry.list() {
            if let Err(e) = self.state.registry.remove(&key).await {
                tracing::warn!(key = %key, error = %e, "failed to remove archive during shutdown");
            }
        }
        self.local_addr = None;
        tracing::info!("gateway closed");
    }
}
