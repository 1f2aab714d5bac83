//! Git object identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// A 20-byte SHA-1 object id as stored in the Git index.
///
/// Serializes as a 40-character lowercase hex string.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ObjectId([u8; 20]);

/// Why a hex string could not be turned into an [`ObjectId`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseObjectIdError {
    #[error("object id must be 40 hex characters, got {0}")]
    Length(usize),
    #[error("invalid hex character {0:?} in object id")]
    Char(char),
}

impl ObjectId {
    /// Byte length of a SHA-1 id.
    pub const LEN: usize = 20;

    /// The all-zero id Git uses for "no object".
    pub const NULL: ObjectId = ObjectId([0; 20]);

    /// Wrap raw id bytes.
    pub const fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Copy an id out of a slice. Returns `None` unless the slice is exactly 20 bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; 20] = bytes.try_into().ok()?;
        Some(Self(bytes))
    }

    /// Parse a 40-character hex id (either case).
    pub fn from_hex(hex: &str) -> Result<Self, ParseObjectIdError> {
        if hex.len() != Self::LEN * 2 {
            return Err(ParseObjectIdError::Length(hex.len()));
        }
        let mut out = [0u8; 20];
        for (i, pair) in hex.as_bytes().chunks_exact(2).enumerate() {
            out[i] = (nibble(pair[0])? << 4) | nibble(pair[1])?;
        }
        Ok(Self(out))
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(40);
        for b in self.0 {
            s.push(HEX[(b >> 4) as usize] as char);
            s.push(HEX[(b & 0x0f) as usize] as char);
        }
        s
    }

    /// True for the all-zero id.
    pub fn is_null(&self) -> bool {
        self.0 == [0; 20]
    }
}

const HEX: &[u8; 16] = b"0123456789abcdef";

fn nibble(b: u8) -> Result<u8, ParseObjectIdError> {
    (b as char)
        .to_digit(16)
        .map(|d| d as u8)
        .ok_or(ParseObjectIdError::Char(b as char))
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

impl FromStr for ObjectId {
    type Err = ParseObjectIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
