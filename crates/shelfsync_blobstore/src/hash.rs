//! Blob identifiers.

use crate::error::{BlobError, BlobResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Length of a hex-encoded SHA-256 digest.
pub const HASH_HEX_LEN: usize = 64;

/// Length of the shard directory prefix.
pub const SHARD_LEN: usize = 2;

/// A blob identifier: the lowercase hex SHA-256 digest of its bytes.
///
/// A `BlobHash` can only be built from a well-formed digest, so any value
/// of this type is safe to turn into a path.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BlobHash(String);

impl BlobHash {
    /// Parses a hex digest.
    ///
    /// Uppercase hex is accepted and normalised to lowercase.
    ///
    /// # Errors
    ///
    /// Returns `InvalidHash` if the input is not exactly 64 hex characters.
    pub fn parse(input: &str) -> BlobResult<Self> {
        if input.len() != HASH_HEX_LEN || !input.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(BlobError::InvalidHash(input.to_string()));
        }
        Ok(Self(input.to_ascii_lowercase()))
    }

    /// Builds a hash from a finished SHA-256 digest.
    pub fn from_digest(digest: [u8; 32]) -> Self {
        Self(hex::encode(digest))
    }

    /// Hashes a byte slice.
    pub fn of(data: &[u8]) -> Self {
        Self::from_digest(Sha256::digest(data).into())
    }

    /// Returns the hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the two-character shard directory name.
    pub fn shard(&self) -> &str {
        &self.0[..SHARD_LEN]
    }
}

impl AsRef<str> for BlobHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlobHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for BlobHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobHash({})", &self.0[..12])
    }
}

impl FromStr for BlobHash {
    type Err = BlobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for BlobHash {
    type Error = BlobError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<BlobHash> for String {
    fn from(hash: BlobHash) -> Self {
        hash.0
    }
}
