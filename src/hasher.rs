//! Key digests
//!
//! Hash maps never store keys by position; they index a fixed-size digest of
//! the key. The digest algorithm is recorded in the file header as a 4-byte
//! id plus the digest length, both validated on open.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};

/// Supported digest algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha1,
    Sha256,
}

impl HashAlgorithm {
    /// Short name, also used to derive the header id
    pub fn name(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha1 => "sha1",
            HashAlgorithm::Sha256 => "sha2",
        }
    }

    /// Length of the produced digest in bytes
    pub fn digest_size(&self) -> usize {
        match self {
            HashAlgorithm::Sha1 => 20,
            HashAlgorithm::Sha256 => 32,
        }
    }
}

/// Digest implementation paired with the id written to the header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hasher {
    algorithm: HashAlgorithm,
    id: u32,
}

impl Hasher {
    /// Create a hasher whose header id is derived from the algorithm name
    pub fn new(algorithm: HashAlgorithm) -> Self {
        let id = Self::name_to_id(algorithm.name());
        Self { algorithm, id }
    }

    /// Create a hasher with an explicit header id
    pub fn with_id(algorithm: HashAlgorithm, id: u32) -> Self {
        Self { algorithm, id }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn digest_size(&self) -> usize {
        self.algorithm.digest_size()
    }

    /// Digest arbitrary bytes
    pub fn digest(&self, bytes: &[u8]) -> Vec<u8> {
        match self.algorithm {
            HashAlgorithm::Sha1 => {
                let mut hasher = Sha1::new();
                hasher.update(bytes);
                hasher.finalize().to_vec()
            }
            HashAlgorithm::Sha256 => {
                let mut hasher = Sha256::new();
                hasher.update(bytes);
                hasher.finalize().to_vec()
            }
        }
    }

    /// Pack an ASCII name of up to 4 bytes into a big-endian id
    pub fn string_to_id(name: &str) -> Result<u32> {
        let bytes = name.as_bytes();
        if bytes.len() > 4 {
            return Err(Error::CorruptFormat(format!(
                "hash id name must be at most 4 bytes: {name}"
            )));
        }
        Ok(Self::name_to_id(name))
    }

    /// Inverse of [`Hasher::string_to_id`]
    pub fn id_to_string(id: u32) -> String {
        id.to_be_bytes()
            .iter()
            .filter(|b| **b != 0)
            .map(|b| *b as char)
            .collect()
    }

    fn name_to_id(name: &str) -> u32 {
        let mut bytes = [0u8; 4];
        for (dst, src) in bytes.iter_mut().zip(name.bytes()) {
            *dst = src;
        }
        u32::from_be_bytes(bytes)
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new(HashAlgorithm::Sha1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_round_trip() -> Result<()> {
        let id = Hasher::string_to_id("sha1")?;
        assert_eq!(id, 0x7368_6131);
        assert_eq!(Hasher::id_to_string(id), "sha1");
        assert!(Hasher::string_to_id("sha256").is_err());
        Ok(())
    }

    #[test]
    fn test_digest_sizes() {
        let sha1 = Hasher::new(HashAlgorithm::Sha1);
        assert_eq!(sha1.digest(b"foo").len(), sha1.digest_size());
        assert_eq!(sha1.id(), 0x7368_6131);

        let sha256 = Hasher::with_id(HashAlgorithm::Sha256, 0);
        assert_eq!(sha256.digest(b"foo").len(), 32);
        assert_eq!(sha256.id(), 0);
    }

    #[test]
    fn test_known_sha1_digest() {
        let digest = Hasher::default().digest(b"abc");
        assert_eq!(digest[..4], [0xa9, 0x99, 0x3e, 0x36]);
    }
}
