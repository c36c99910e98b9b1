use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use std::fmt;

/// General-purpose 512-bit digest used throughout the node: transaction ids,
/// block content hashes, merkle nodes, and the input to the public-key-hash
/// derivation. The keyed memory-hard PoW hasher uses a different, narrower
/// digest (see [`PowHash`]) and is never represented by this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hash512([u8; 64]);

impl Hash512 {
    /// Creates a zeroed hash, used as the parent hash of the genesis block
    /// and as the cleared value of a transaction's id field before hashing.
    #[must_use]
    pub const fn zero() -> Self {
        Self([0u8; 64])
    }

    #[must_use]
    pub const fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Builds a hash from a byte slice of the wrong length for errors raised
    /// while decoding untrusted wire/store data.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 64] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 64]
    }

    /// Computes the SHA-512 digest of `data`.
    #[must_use]
    pub fn sha512(data: &[u8]) -> Self {
        let mut hasher = Sha512::new();
        hasher.update(data);
        let result = hasher.finalize();
        let mut hash = [0u8; 64];
        hash.copy_from_slice(&result);
        Self(hash)
    }
}

impl fmt::Display for Hash512 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl AsRef<[u8]> for Hash512 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// 256-bit output of the keyed memory-hard proof-of-work hasher. Only ever
/// produced by the PoW facade (`core::pow`); never used for content
/// addressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PowHash([u8; 32]);

impl PowHash {
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// True if, read as a big-endian unsigned 256-bit integer, this hash is
    /// strictly below `2^(256 - difficulty)`.
    #[must_use]
    pub fn meets_difficulty(&self, difficulty: u32) -> bool {
        self.leading_zero_bits() >= difficulty
    }

    #[must_use]
    pub fn leading_zero_bits(&self) -> u32 {
        let mut zeros = 0;
        for &byte in &self.0 {
            if byte == 0 {
                zeros += 8;
            } else {
                zeros += byte.leading_zeros();
                break;
            }
        }
        zeros
    }
}

impl fmt::Display for PowHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_hash_displays_as_all_zero_hex() {
        let hash = Hash512::zero();
        assert_eq!(hash.to_string(), "0".repeat(128));
        assert!(hash.is_zero());
    }

    #[test]
    fn sha512_of_distinct_inputs_differ() {
        let a = Hash512::sha512(b"hello world");
        let b = Hash512::sha512(b"hello world!");
        assert_ne!(a, b);
        assert_ne!(a, Hash512::zero());
    }

    #[test]
    fn from_slice_rejects_wrong_length() {
        assert!(Hash512::from_slice(&[0u8; 32]).is_none());
        assert!(Hash512::from_slice(&[0u8; 64]).is_some());
    }

    #[test]
    fn difficulty_check_counts_leading_zero_bits() {
        let mut bytes = [0xffu8; 32];
        bytes[0] = 0;
        bytes[1] = 0;
        bytes[2] = 0b0000_0001;
        let hash = PowHash::from_bytes(bytes);
        assert_eq!(hash.leading_zero_bits(), 23);
        assert!(hash.meets_difficulty(23));
        assert!(!hash.meets_difficulty(24));
    }
}
