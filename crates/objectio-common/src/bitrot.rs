//! Bitrot checksum utilities
//!
//! Algorithms a caller may name when asking a drive to verify data as it is
//! read back, plus a streaming hasher for whole-part verification.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Supported bitrot algorithms
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BitrotAlgorithm {
    Crc32c,
    XxHash64,
    Sha256,
}

impl BitrotAlgorithm {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Crc32c => "crc32c",
            Self::XxHash64 => "xxhash64",
            Self::Sha256 => "sha256",
        }
    }

    /// Digest `data` in one shot
    #[must_use]
    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        let mut hasher = BitrotHasher::new(self);
        hasher.update(data);
        hasher.finalize()
    }
}

impl fmt::Display for BitrotAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BitrotAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "crc32c" => Ok(Self::Crc32c),
            "xxhash64" | "xxh64" => Ok(Self::XxHash64),
            "sha256" => Ok(Self::Sha256),
            other => Err(Error::invalid_argument(format!(
                "unknown bitrot algorithm: {other}"
            ))),
        }
    }
}

/// Streaming hasher over one of the bitrot algorithms
pub enum BitrotHasher {
    Crc32c(u32),
    XxHash64(Box<xxhash_rust::xxh64::Xxh64>),
    Sha256(Sha256),
}

impl BitrotHasher {
    #[must_use]
    pub fn new(algorithm: BitrotAlgorithm) -> Self {
        match algorithm {
            BitrotAlgorithm::Crc32c => Self::Crc32c(0),
            BitrotAlgorithm::XxHash64 => {
                Self::XxHash64(Box::new(xxhash_rust::xxh64::Xxh64::new(0)))
            }
            BitrotAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Crc32c(crc) => *crc = crc32c::crc32c_append(*crc, data),
            Self::XxHash64(state) => state.update(data),
            Self::Sha256(sha) => sha.update(data),
        }
    }

    /// Big-endian digest bytes
    #[must_use]
    pub fn finalize(self) -> Vec<u8> {
        match self {
            Self::Crc32c(crc) => crc.to_be_bytes().to_vec(),
            Self::XxHash64(state) => state.digest().to_be_bytes().to_vec(),
            Self::Sha256(sha) => sha.finalize().to_vec(),
        }
    }
}

/// Expected digest for data read back from a drive
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BitrotVerifier {
    pub algorithm: BitrotAlgorithm,
    pub expected: Vec<u8>,
}

impl BitrotVerifier {
    #[must_use]
    pub const fn new(algorithm: BitrotAlgorithm, expected: Vec<u8>) -> Self {
        Self {
            algorithm,
            expected,
        }
    }

    /// Build from an algorithm name and a hex digest, as sent on the wire
    pub fn from_hex(algorithm: &str, hash: &str) -> Result<Self> {
        let algorithm = algorithm.parse()?;
        let expected = hex::decode(hash)
            .map_err(|e| Error::invalid_argument(format!("bitrot hash: {e}")))?;
        Ok(Self::new(algorithm, expected))
    }

    #[must_use]
    pub fn verify(&self, data: &[u8]) -> bool {
        self.algorithm.digest(data) == self.expected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_algorithm() {
        assert_eq!("crc32c".parse::<BitrotAlgorithm>().unwrap(), BitrotAlgorithm::Crc32c);
        assert_eq!("XXH64".parse::<BitrotAlgorithm>().unwrap(), BitrotAlgorithm::XxHash64);
        assert_eq!("sha256".parse::<BitrotAlgorithm>().unwrap(), BitrotAlgorithm::Sha256);
        assert!("md5".parse::<BitrotAlgorithm>().is_err());
    }

    #[test]
    fn test_streaming_matches_one_shot() {
        for algo in [
            BitrotAlgorithm::Crc32c,
            BitrotAlgorithm::XxHash64,
            BitrotAlgorithm::Sha256,
        ] {
            let expected = algo.digest(b"hello, world!");
            let mut hasher = BitrotHasher::new(algo);
            hasher.update(b"hello, ");
            hasher.update(b"world!");
            assert_eq!(hasher.finalize(), expected, "{algo}");
        }
    }

    #[test]
    fn test_verifier() {
        let data = b"part.1 contents";
        let hash = hex::encode(BitrotAlgorithm::Sha256.digest(data));
        let verifier = BitrotVerifier::from_hex("sha256", &hash).unwrap();
        assert!(verifier.verify(data));
        assert!(!verifier.verify(b"part.1 content?"));

        assert!(BitrotVerifier::from_hex("sha256", "zz").is_err());
    }
}
