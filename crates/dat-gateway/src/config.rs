//! Gateway configuration types.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use dat_gateway_registry::RegistryConfig;

/// Configuration for the gateway service.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Directory for archiver metadata persistence.
    #[serde(default = "GatewayConfig::default_dir")]
    pub dir: PathBuf,

    /// Maximum number of resident archives.
    #[serde(default = "GatewayConfig::default_max")]
    pub max: usize,

    /// Idle time in milliseconds after which a resident archive expires.
    /// Expiry is enabled only when `period_ms` is also set.
    #[serde(default)]
    pub ttl_ms: Option<u64>,

    /// Milliseconds between expiry sweeps.
    #[serde(default)]
    pub period_ms: Option<u64>,

    /// Enable subdomain-based addressing: archive requests are redirected
    /// to `http://<base32-key>.<host>/` and the leading hostname label is
    /// decoded as the key.
    #[serde(default)]
    pub redirect: bool,

    /// How long an admission waits for an archive to materialize, in
    /// milliseconds.
    #[serde(default = "GatewayConfig::default_ready_timeout")]
    pub ready_timeout_ms: u64,

    /// Per-request timeout in milliseconds, after which an archive request
    /// answers 404.
    #[serde(default = "GatewayConfig::default_request_timeout")]
    pub request_timeout_ms: u64,
}

impl GatewayConfig {
    fn default_dir() -> PathBuf {
        PathBuf::from(".dat-gateway")
    }

    const fn default_max() -> usize {
        20
    }

    const fn default_ready_timeout() -> u64 {
        3_000
    }

    const fn default_request_timeout() -> u64 {
        5_000
    }

    /// Get the readiness timeout as a `Duration`.
    #[must_use]
    pub const fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    /// Get the request timeout as a `Duration`.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Derive the registry configuration for this gateway.
    #[must_use]
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            max: self.max,
            ttl: self.ttl_ms.map(Duration::from_millis),
            sweep_period: self.period_ms.map(Duration::from_millis),
            ready_timeout: self.ready_timeout(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            dir: Self::default_dir(),
            max: Self::default_max(),
            ttl_ms: None,
            period_ms: None,
            redirect: false,
            ready_timeout_ms: Self::default_ready_timeout(),
            request_timeout_ms: Self::default_request_timeout(),
        }
    }
}
