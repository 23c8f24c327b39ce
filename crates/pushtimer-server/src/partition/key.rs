//! Partition keys.

use std::fmt;

use sha2::{Digest, Sha256};

/// Longest accepted key, in bytes. Keys are hex-encoded into file names, so
/// this keeps file names under common 255-byte limits.
pub const MAX_KEY_BYTES: usize = 120;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidKey {
    #[error("partition key is empty")]
    Empty,

    #[error("partition key is {0} bytes, limit is {MAX_KEY_BYTES}")]
    TooLong(usize),

    #[error("file stem is not a hex-encoded key: {0}")]
    BadStem(String),
}

/// Name of one partition: one subscriber, one actor, one database file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartitionKey(String);

impl PartitionKey {
    pub fn new(key: impl Into<String>) -> Result<Self, InvalidKey> {
        let key = key.into();
        if key.is_empty() {
            return Err(InvalidKey::Empty);
        }
        if key.len() > MAX_KEY_BYTES {
            return Err(InvalidKey::TooLong(key.len()));
        }
        Ok(Self(key))
    }

    /// Key derived from a push endpoint: lowercase hex SHA-256 of the URL.
    ///
    /// The same endpoint always lands in the same partition.
    pub fn from_endpoint(endpoint: &str) -> Self {
        Self(hex::encode(Sha256::digest(endpoint.as_bytes())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File-system safe encoding of the key.
    pub fn file_stem(&self) -> String {
        hex::encode(self.0.as_bytes())
    }

    /// Inverse of [`PartitionKey::file_stem`].
    pub fn from_file_stem(stem: &str) -> Result<Self, InvalidKey> {
        let bytes = hex::decode(stem).map_err(|e| InvalidKey::BadStem(e.to_string()))?;
        let key = String::from_utf8(bytes).map_err(|e| InvalidKey::BadStem(e.to_string()))?;
        Self::new(key)
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
