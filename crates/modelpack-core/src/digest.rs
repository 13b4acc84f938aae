//! Content digests in `<algorithm>:<hex>` form

use crate::{PackError, PackResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::str::FromStr;

/// Hash algorithm used to address blobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Algorithm {
    /// SHA-256, the only algorithm this store produces
    Sha256,
}

impl Algorithm {
    /// Name used in digest strings and blob directories
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Sha256 => "sha256",
        }
    }

    fn hex_len(&self) -> usize {
        match self {
            Algorithm::Sha256 => 64,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A content digest, e.g. `sha256:2c26b4...`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest {
    algorithm: Algorithm,
    hex: String,
}

impl Digest {
    /// Compute the SHA-256 digest of `bytes`
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            algorithm: Algorithm::Sha256,
            hex: hex::encode(Sha256::digest(bytes)),
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Lowercase hex part, without the algorithm prefix
    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// First 7 hex characters, for display
    pub fn short(&self) -> &str {
        &self.hex[..7]
    }

    /// Check that `bytes` hash to this digest
    pub fn verify(&self, bytes: &[u8]) -> PackResult<()> {
        let actual = Digest::from_bytes(bytes);
        if &actual != self {
            return Err(PackError::DigestMismatch {
                expected: self.to_string(),
                actual: actual.to_string(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

impl FromStr for Digest {
    type Err = PackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (algorithm, hex) = s
            .split_once(':')
            .ok_or_else(|| PackError::InvalidDigest(format!("missing algorithm in {:?}", s)))?;
        let algorithm = match algorithm {
            "sha256" => Algorithm::Sha256,
            other => {
                return Err(PackError::InvalidDigest(format!(
                    "unsupported algorithm {:?}",
                    other
                )))
            }
        };
        if hex.len() != algorithm.hex_len()
            || !hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        {
            return Err(PackError::InvalidDigest(format!(
                "malformed {} hex in {:?}",
                algorithm, s
            )));
        }
        Ok(Self {
            algorithm,
            hex: hex.to_string(),
        })
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
