//! Shared state for the gateway's request handlers.

use std::sync::Arc;

use dat_gateway_dns::Resolver;
use dat_gateway_registry::ArchiveRegistry;
use dat_gateway_swarm::Swarm;

use crate::config::GatewayConfig;

/// State available to every HTTP and WebSocket handler.
#[derive(Clone)]
pub struct GatewayState {
    /// The archive cache and lifecycle manager.
    pub registry: ArchiveRegistry,
    /// The swarm adapter, for opening replication streams.
    pub swarm: Arc<dyn Swarm>,
    /// The name resolver.
    pub resolver: Arc<Resolver>,
    /// Gateway configuration.
    pub config: GatewayConfig,
}

impl GatewayState {
    /// Create a new gateway state.
    #[must_use]
    pub fn new(
        registry: ArchiveRegistry,
        swarm: Arc<dyn Swarm>,
        resolver: Arc<Resolver>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            registry,
            swarm,
            resolver,
            config,
        }
    }
}
