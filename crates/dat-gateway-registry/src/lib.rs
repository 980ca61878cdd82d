//! Archive cache and lifecycle manager for the Dat gateway.
//!
//! The registry admits archives into a bounded, TTL-governed in-memory set
//! with at-most-once concurrent admission per key, joins and leaves the
//! replication swarm as archives come and go, and evicts the least recently
//! used archive when the cache is full.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌──────────────────────────────┐
//! │  HTTP / WS       │────▶│       ArchiveRegistry        │
//! │  front ends      │     │  resident │ pending │ LRU    │
//! └──────────────────┘     └──────────┬───────────────────┘
//!                                     │ join / leave / events
//!                            ┌────────▼─────────┐
//!                            │   Swarm (trait)  │
//!                            └──────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use dat_gateway_core::ArchiveKey;
//! use dat_gateway_registry::{ArchiveRegistry, RegistryConfig};
//! use dat_gateway_swarm::LocalArchiver;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let archiver = LocalArchiver::open("/tmp/dat-gateway")?;
//! let registry = ArchiveRegistry::new(Arc::new(archiver), RegistryConfig::default());
//!
//! let key = ArchiveKey::from_bytes([0u8; 32]);
//! let archive = registry.get_or_admit(key).await?;
//! println!("serving {}", archive.key());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod archive;
pub mod error;
pub mod registry;
pub mod sweeper;

pub use archive::LiveArchive;
pub use error::{AdmitError, RegistryError, Result};
pub use registry::{ArchiveRegistry, RegistryConfig};
pub use sweeper::spawn_sweeper;
