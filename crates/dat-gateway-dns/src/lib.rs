//! Dat name resolution for the gateway.
//!
//! This crate maps user-supplied addresses to canonical archive keys:
//!
//! - a 64-character hex string is already a key
//! - a 52-character base32 string decodes to a key
//! - anything else is treated as a DNS name and resolved through the
//!   well-known Dat record at `https://<host>/.well-known/dat`
//!
//! Resolved records are cached per host for the TTL they advertise
//! (default 3600 seconds) so repeated requests for the same name do not
//! hammer DNS.
//!
//! # Example
//!
//! ```no_run
//! use dat_gateway_dns::Resolver;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let resolver = Resolver::new();
//! let key = resolver.resolve("garbados.hashbase.io").await?;
//! println!("resolved to {key}");
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod resolver;

pub use error::{DnsError, Result};
pub use resolver::Resolver;
