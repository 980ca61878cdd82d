//! Dat Gateway - HTTP/WebSocket gateway to the Dat network.
//!
//! This is the main entry point for the gateway service.
//!
//! # Configuration
//!
//! All configuration comes from environment variables:
//!
//! - `PORT` - listen port (default 5917)
//! - `DAT_GATEWAY_DIR` - archiver storage directory (default `.dat-gateway`)
//! - `DAT_GATEWAY_MAX` - maximum resident archives (default 20)
//! - `DAT_GATEWAY_TTL_MS` / `DAT_GATEWAY_PERIOD_MS` - idle expiry; both
//!   must be set to enable the sweeper
//! - `DAT_GATEWAY_REDIRECT` - set to `1` or `true` to enable
//!   subdomain-based addressing
//! - `DEBUG` / `LOG` - any non-empty value enables diagnostic logging for
//!   the gateway's own crates; `RUST_LOG` overrides as usual

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dat_gateway::{Gateway, GatewayConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Dat gateway");

    let config = config_from_env();
    let port: u16 = env_parsed("PORT").unwrap_or(5917);

    tracing::info!(
        dir = %config.dir.display(),
        max = config.max,
        ttl_ms = ?config.ttl_ms,
        period_ms = ?config.period_ms,
        redirect = config.redirect,
        port,
        "Gateway configuration loaded"
    );

    let mut gateway = Gateway::load(config)?;
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    gateway.listen(addr).await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal");
    gateway.close().await;

    Ok(())
}

/// Build the gateway configuration from environment variables.
fn config_from_env() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    if let Ok(dir) = std::env::var("DAT_GATEWAY_DIR") {
        config.dir = PathBuf::from(dir);
    }
    if let Some(max) = env_parsed("DAT_GATEWAY_MAX") {
        config.max = max;
    }
    config.ttl_ms = env_parsed("DAT_GATEWAY_TTL_MS");
    config.period_ms = env_parsed("DAT_GATEWAY_PERIOD_MS");
    config.redirect = std::env::var("DAT_GATEWAY_REDIRECT")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    config
}

/// Read and parse an environment variable, ignoring absent or malformed
/// values.
fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

/// The `DEBUG` and `LOG` variables turn on diagnostics for the gateway's
/// own crates.
fn default_filter() -> &'static str {
    let diagnostics = ["DEBUG", "LOG"]
        .iter()
        .any(|name| std::env::var(name).is_ok_and(|v| !v.is_empty()));
    if diagnostics {
        "info,dat_gateway=debug,dat_gateway_registry=debug,dat_gateway_swarm=debug,dat_gateway_dns=debug"
    } else {
        "info"
    }
}
