//! Swarm adapter for the Dat gateway.
//!
//! This crate wraps the content-addressed archiver behind two narrow
//! interfaces:
//!
//! - [`Swarm`]: join/leave archives, open replication streams, and observe
//!   materialization events
//! - [`Drive`]: the read-only filesystem view of one materialized archive
//!
//! The shipped implementation, [`LocalArchiver`], persists archive metadata
//! under a storage directory and replicates archives with its peers over a
//! framed byte-stream protocol. The gateway's front ends never see any of
//! this; they only hold the trait objects.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌──────────────────┐
//! │   Registry       │────▶│   Swarm (trait)  │
//! │                  │     └────────┬─────────┘
//! │   HTTP serving   │              │
//! │        │         │     ┌────────▼─────────┐
//! │        └────────────── │  LocalArchiver   │
//! │   Drive (trait)  │     │  (impl)          │
//! └──────────────────┘     └────────┬─────────┘
//!                                   │ replication streams
//!                          ┌────────▼─────────┐
//!                          │   remote peers   │
//!                          └──────────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod drive;
pub mod error;
pub mod local;
pub mod protocol;
pub mod swarm;

pub use drive::{normalize_path, DirEntry, Drive, DriveError, Stat};
pub use error::{Result, SwarmError};
pub use local::LocalArchiver;
pub use swarm::{ReplicationStream, Swarm, SwarmEvent};
