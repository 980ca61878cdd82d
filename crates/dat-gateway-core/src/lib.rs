//! Core types for the Dat gateway.
//!
//! This crate provides the foundational types shared by every other crate in
//! the workspace:
//!
//! - **`ArchiveKey`**: the 32-byte public key identifying an archive, with
//!   its two canonical text encodings (64 hex characters, 52 base32
//!   characters)
//! - **`KeyError`**: parse errors for both encodings
//!
//! # Example
//!
//! ```
//! use dat_gateway_core::ArchiveKey;
//!
//! let key = ArchiveKey::from_hex(
//!     "c33bc8d7c32a6e905905efdbf21efea9ff23b00d1c3ee9aea80092eaba6c4957"
//! ).unwrap();
//!
//! // The subdomain label form is always 52 characters.
//! let label = key.to_base32();
//! assert_eq!(label.len(), 52);
//! assert_eq!(ArchiveKey::from_base32(&label).unwrap(), key);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod key;

pub use key::{ArchiveKey, KeyError, BASE32_KEY_LEN, HEX_KEY_LEN};
