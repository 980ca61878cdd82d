//! Archive key type and its text encodings.
//!
//! An archive is identified by a 32-byte public key. Two text encodings are
//! in circulation: 64 lowercase hex characters (the canonical form used in
//! URLs and on the wire) and 52 base32 characters without padding (used as a
//! DNS-safe hostname label for subdomain addressing).

use std::fmt;
use std::str::FromStr;

use data_encoding::BASE32_NOPAD;
use serde::{Deserialize, Serialize};

/// Length of a hex-encoded archive key in characters.
pub const HEX_KEY_LEN: usize = 64;

/// Length of a base32-encoded archive key in characters.
///
/// 32 bytes encode to exactly 52 characters without padding. The length is a
/// fixed sentinel: hostname labels of any other length are never decoded as
/// keys.
pub const BASE32_KEY_LEN: usize = 52;

/// A 32-byte archive public key, hex-encoded for display.
///
/// Equality is byte-equality; keys are the sole identity used by the
/// registry. The `Ord` impl orders by key bytes and is used to break
/// eviction ties deterministically.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ArchiveKey([u8; 32]);

impl ArchiveKey {
    /// Create an `ArchiveKey` from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parse an `ArchiveKey` from a 64-character hex string.
    ///
    /// Input case is ignored; the canonical output of [`to_hex`](Self::to_hex)
    /// is lowercase.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not exactly 64 characters or is not
    /// valid hex.
    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        if s.len() != HEX_KEY_LEN {
            return Err(KeyError::InvalidLength {
                expected: HEX_KEY_LEN,
                got: s.len(),
            });
        }
        let bytes = hex::decode(s).map_err(|_| KeyError::InvalidHex)?;
        let arr: [u8; 32] = bytes.try_into().map_err(|_| KeyError::InvalidHex)?;
        Ok(Self(arr))
    }

    /// Parse an `ArchiveKey` from a 52-character base32 string.
    ///
    /// Only the unpadded RFC 4648 alphabet is accepted, in either case.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not exactly 52 characters or does
    /// not decode to 32 bytes.
    pub fn from_base32(s: &str) -> Result<Self, KeyError> {
        if s.len() != BASE32_KEY_LEN {
            return Err(KeyError::InvalidLength {
                expected: BASE32_KEY_LEN,
                got: s.len(),
            });
        }
        let upper = s.to_ascii_uppercase();
        let bytes = BASE32_NOPAD
            .decode(upper.as_bytes())
            .map_err(|_| KeyError::InvalidBase32)?;
        let arr: [u8; 32] = bytes.try_into().map_err(|_| KeyError::InvalidBase32)?;
        Ok(Self(arr))
    }

    /// Return the underlying bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Return the canonical lowercase hex representation (64 characters).
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Return the lowercase base32 representation (52 characters), suitable
    /// for use as a hostname label.
    #[must_use]
    pub fn to_base32(&self) -> String {
        BASE32_NOPAD.encode(&self.0).to_ascii_lowercase()
    }
}

impl fmt::Debug for ArchiveKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArchiveKey({})", self.to_hex())
    }
}

impl fmt::Display for ArchiveKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for ArchiveKey {
    type Err = KeyError;

    /// Parse a key from either text encoding, selected by length.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.len() {
            HEX_KEY_LEN => Self::from_hex(s),
            BASE32_KEY_LEN => Self::from_base32(s),
            got => Err(KeyError::InvalidLength {
                expected: HEX_KEY_LEN,
                got,
            }),
        }
    }
}

impl TryFrom<String> for ArchiveKey {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ArchiveKey> for String {
    fn from(key: ArchiveKey) -> Self {
        key.to_hex()
    }
}

impl AsRef<[u8]> for ArchiveKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Errors that can occur when parsing archive keys.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    /// The input string contains invalid hexadecimal characters.
    #[error("invalid hex encoding")]
    InvalidHex,

    /// The input string is not valid unpadded base32.
    #[error("invalid base32 encoding")]
    InvalidBase32,

    /// The input has an incorrect length.
    #[error("invalid length: expected {expected} characters, got {got}")]
    InvalidLength {
        /// The expected number of characters.
        expected: usize,
        /// The actual number of characters.
        got: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEX: &str = "c33bc8d7c32a6e905905efdbf21efea9ff23b00d1c3ee9aea80092eaba6c4957";

    #[test]
    fn hex_roundtrip() {
        let key = ArchiveKey::from_hex(HEX).unwrap();
        assert_eq!(key.to_hex(), HEX);
    }

    #[test]
    fn hex_uppercase_input_is_canonicalized() {
        let key = ArchiveKey::from_hex(&HEX.to_ascii_uppercase()).unwrap();
        assert_eq!(key.to_hex(), HEX);
    }

    #[test]
    fn base32_roundtrip_is_identity() {
        let key = ArchiveKey::from_hex(HEX).unwrap();
        let label = key.to_base32();
        assert_eq!(label.len(), BASE32_KEY_LEN);
        assert_eq!(ArchiveKey::from_base32(&label).unwrap(), key);
    }

    #[test]
    fn base32_rejects_other_lengths() {
        let key = ArchiveKey::from_bytes([7u8; 32]);
        let label = key.to_base32();
        let short = &label[..BASE32_KEY_LEN - 1];
        assert!(matches!(
            ArchiveKey::from_base32(short),
            Err(KeyError::InvalidLength { .. })
        ));
        let long = format!("{label}a");
        assert!(matches!(
            ArchiveKey::from_base32(&long),
            Err(KeyError::InvalidLength { .. })
        ));
    }

    #[test]
    fn invalid_hex() {
        let bad = "z".repeat(HEX_KEY_LEN);
        assert!(matches!(
            ArchiveKey::from_hex(&bad),
            Err(KeyError::InvalidHex)
        ));
    }

    #[test]
    fn wrong_length() {
        assert!(matches!(
            ArchiveKey::from_hex("deadbeef"),
            Err(KeyError::InvalidLength { .. })
        ));
    }

    #[test]
    fn from_str_selects_encoding_by_length() {
        let key = ArchiveKey::from_hex(HEX).unwrap();
        assert_eq!(HEX.parse::<ArchiveKey>().unwrap(), key);
        assert_eq!(key.to_base32().parse::<ArchiveKey>().unwrap(), key);
        assert!("short".parse::<ArchiveKey>().is_err());
    }

    #[test]
    fn serde_json_roundtrip() {
        let key = ArchiveKey::from_bytes([0xab; 32]);
        let json = serde_json::to_string(&key).unwrap();
        let parsed: ArchiveKey = serde_json::from_str(&json).unwrap();
        assert_eq!(key, parsed);
    }

    #[test]
    fn ordering_is_byte_order() {
        let a = ArchiveKey::from_bytes([1u8; 32]);
        let b = ArchiveKey::from_bytes([2u8; 32]);
        assert!(a < b);
    }
}
