//! Fixed-width identifiers
//!
//! `Bytes32` is the content-derived key for coins, the puzzle hash of a
//! derivation path and the id of a trade. Its text form is lowercase hex,
//! its storage form is a 32-byte blob so that SQL ordering matches `Ord`.

use crate::{Error, Result};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A 32-byte hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Bytes32(pub [u8; 32]);

impl Bytes32 {
    pub const LEN: usize = 32;

    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Build from a slice, failing unless it is exactly 32 bytes long
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let array: [u8; 32] = bytes.try_into().map_err(|_| {
            Error::InvalidRecord(format!("expected {} bytes, got {}", Self::LEN, bytes.len()))
        })?;
        Ok(Self(array))
    }

    /// blake3 digest of the concatenated parts
    pub fn hash_of(parts: &[&[u8]]) -> Self {
        let mut hasher = blake3::Hasher::new();
        for part in parts {
            hasher.update(part);
        }
        Self(*hasher.finalize().as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<[u8; 32]> for Bytes32 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Bytes32 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Bytes32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Bytes32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bytes32({})", self.to_hex())
    }
}

impl FromStr for Bytes32 {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s)
            .map_err(|e| Error::InvalidArgument(format!("invalid hex '{}': {}", s, e)))?;
        Self::from_slice(&bytes)
    }
}

impl Serialize for Bytes32 {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Bytes32 {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Bytes32::from_str(&s).map_err(serde::de::Error::custom)
    }
}

impl ToSql for Bytes32 {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Borrowed(ValueRef::Blob(&self.0)))
    }
}

impl FromSql for Bytes32 {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let blob = value.as_blob()?;
        let array: [u8; 32] = blob.try_into().map_err(|_| FromSqlError::InvalidBlobSize {
            expected_size: Self::LEN,
            blob_size: blob.len(),
        })?;
        Ok(Self(array))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_roundtrip() {
        let id = Bytes32::new([0xab; 32]);
        let text = id.to_string();
        assert_eq!(text.len(), 64);
        assert_eq!(Bytes32::from_str(&text).unwrap(), id);
        assert_eq!(Bytes32::from_str(&format!("0x{}", text)).unwrap(), id);
    }

    #[test]
    fn test_rejects_wrong_length() {
        assert!(Bytes32::from_str("abcd").is_err());
        assert!(Bytes32::from_slice(&[1u8; 31]).is_err());
        assert!(Bytes32::from_str("zz").is_err());
    }

    #[test]
    fn test_ordering_is_bytewise() {
        let mut low = [0u8; 32];
        low[0] = 1;
        let mut high = [0u8; 32];
        high[0] = 2;
        assert!(Bytes32::new(low) < Bytes32::new(high));
    }

    #[test]
    fn test_hash_of_depends_on_every_part() {
        let a = Bytes32::hash_of(&[b"parent".as_slice(), b"puzzle".as_slice()]);
        let b = Bytes32::hash_of(&[b"parent".as_slice(), b"puzzle2".as_slice()]);
        assert_ne!(a, b);
        assert_eq!(a, Bytes32::hash_of(&[b"parent".as_slice(), b"puzzle".as_slice()]));
    }
}
