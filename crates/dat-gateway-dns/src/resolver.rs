//! Well-known Dat record resolution and caching.
//!
//! A Dat DNS record is served over HTTPS at `https://<host>/.well-known/dat`
//! and looks like:
//!
//! ```text
//! dat://c33bc8d7c32a6e905905efdbf21efea9ff23b00d1c3ee9aea80092eaba6c4957
//! ttl=3600
//! ```
//!
//! The first `dat://` line carries the key; an optional `ttl=` line says how
//! long the mapping may be cached.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use dat_gateway_core::{ArchiveKey, BASE32_KEY_LEN, HEX_KEY_LEN};

use crate::error::{DnsError, Result};

/// Default record TTL when the record does not advertise one.
const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Timeout for a single well-known lookup.
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

/// A cached resolution with its expiry.
struct CachedRecord {
    key: ArchiveKey,
    fetched_at: Instant,
    ttl: Duration,
}

impl CachedRecord {
    fn is_fresh(&self) -> bool {
        self.fetched_at.elapsed() < self.ttl
    }
}

/// Resolves addresses to archive keys, caching DNS results per host.
pub struct Resolver {
    client: reqwest::Client,
    cache: RwLock<HashMap<String, CachedRecord>>,
}

impl Resolver {
    /// Create a new resolver with its own HTTP client.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client cannot be created (should never happen with
    /// default TLS).
    #[must_use]
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(LOOKUP_TIMEOUT)
            .build()
            .expect("failed to create HTTP client");

        Self {
            client,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve an address to a canonical archive key.
    ///
    /// Key-shaped addresses (64 hex or 52 base32 characters) are decoded
    /// locally; anything else goes through the well-known Dat record for the
    /// host, consulting the cache first.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is malformed, the lookup fails, or
    /// the record does not contain a key.
    pub async fn resolve(&self, address: &str) -> Result<ArchiveKey> {
        match address.len() {
            HEX_KEY_LEN => {
                if let Ok(key) = ArchiveKey::from_hex(address) {
                    return Ok(key);
                }
                // Not hex after all; it may still be a (long) hostname.
            }
            BASE32_KEY_LEN => {
                if let Ok(key) = ArchiveKey::from_base32(address) {
                    return Ok(key);
                }
                // A 52-character string that is not base32 may still be a
                // hostname; fall through to the DNS path.
            }
            _ => {}
        }

        if !looks_like_host(address) {
            return Err(DnsError::InvalidAddress(address.to_string()));
        }

        if let Some(key) = self.cached(address) {
            return Ok(key);
        }

        self.lookup(address).await
    }

    /// Return the cached key for a host if present and unexpired.
    fn cached(&self, host: &str) -> Option<ArchiveKey> {
        let cache = self.cache.read();
        cache.get(host).filter(|r| r.is_fresh()).map(|r| r.key)
    }

    /// Fetch and cache the well-known record for a host.
    async fn lookup(&self, host: &str) -> Result<ArchiveKey> {
        let url = format!("https://{host}/.well-known/dat");
        tracing::debug!(url = %url, "fetching dat DNS record");

        let body = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| DnsError::Lookup(e.to_string()))?
            .error_for_status()
            .map_err(|e| DnsError::Lookup(e.to_string()))?
            .text()
            .await
            .map_err(|e| DnsError::Lookup(e.to_string()))?;

        let (key, ttl) = parse_record(&body).ok_or_else(|| DnsError::BadRecord(host.to_string()))?;

        tracing::debug!(host = %host, key = %key, ttl_secs = ttl.as_secs(), "cached dat DNS record");

        let mut cache = self.cache.write();
        cache.insert(
            host.to_string(),
            CachedRecord {
                key,
                fetched_at: Instant::now(),
                ttl,
            },
        );

        Ok(key)
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a well-known Dat record body into a key and TTL.
///
/// Returns the first `dat://<key>` line and the advertised `ttl=` value
/// (default 3600 s). `None` if no valid key line is present.
fn parse_record(body: &str) -> Option<(ArchiveKey, Duration)> {
    let mut key = None;
    let mut ttl = DEFAULT_TTL;

    for line in body.lines() {
        let line = line.trim();
        if key.is_none() {
            if let Some(rest) = line.strip_prefix("dat://") {
                if let Ok(parsed) = ArchiveKey::from_hex(rest) {
                    key = Some(parsed);
                }
            }
        }
        if let Some(rest) = line.strip_prefix("ttl=") {
            if let Ok(secs) = rest.parse::<u64>() {
                ttl = Duration::from_secs(secs);
            }
        }
    }

    key.map(|k| (k, ttl))
}

/// A very light sanity check on hostnames: non-empty labels of hostname
/// characters. Rejects paths and empty strings before we build a URL.
fn looks_like_host(s: &str) -> bool {
    !s.is_empty()
        && s.split('.').all(|label| {
            !label.is_empty()
                && label
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        })
}
