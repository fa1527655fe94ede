//! 32-byte hashes and the hash functions used on the wire

use crate::encoding::{Decodable, Decoder, Encodable, Encoder};
use crate::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Sha3_256};
use std::fmt;
use std::str::FromStr;

/// A 32-byte hash in natural byte order
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    /// The all-zero hash
    pub const ZERO: Hash = Hash([0u8; 32]);

    /// Borrow the raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Build from a slice that must be exactly 32 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::Decode(format!("hash must be 32 bytes, got {}", bytes.len())))?;
        Ok(Self(arr))
    }

    /// Lowercase hex
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// True for the all-zero hash
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

impl FromStr for Hash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| Error::Decode(format!("invalid hash hex: {}", e)))?;
        Self::from_slice(&bytes)
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl Encodable for Hash {
    fn encode_to(&self, encoder: &mut Encoder) {
        encoder.write_bytes(&self.0);
    }
}

impl Decodable for Hash {
    fn decode_from(decoder: &mut Decoder<'_>) -> Result<Self> {
        Ok(Self(decoder.read_fixed()?))
    }
}

fn blake2b(len: usize, parts: &[&[u8]]) -> blake2b_simd::Hash {
    let mut state = blake2b_simd::Params::new().hash_length(len).to_state();
    for part in parts {
        state.update(part);
    }
    state.finalize()
}

/// blake2b with a 256-bit digest over the concatenation of `parts`
pub fn blake2b256(parts: &[&[u8]]) -> Hash {
    let digest = blake2b(32, parts);
    let mut out = [0u8; 32];
    out.copy_from_slice(digest.as_bytes());
    Hash(out)
}

/// blake2b with a 160-bit digest (address hashes)
pub fn blake2b160(data: &[u8]) -> [u8; 20] {
    let digest = blake2b(20, &[data]);
    let mut out = [0u8; 20];
    out.copy_from_slice(digest.as_bytes());
    out
}

/// blake2b with a 512-bit digest
pub fn blake2b512(parts: &[&[u8]]) -> [u8; 64] {
    let digest = blake2b(64, parts);
    let mut out = [0u8; 64];
    out.copy_from_slice(digest.as_bytes());
    out
}

/// SHA3-256 over the concatenation of `parts`
pub fn sha3_256(parts: &[&[u8]]) -> Hash {
    let mut hasher = Sha3_256::new();
    for part in parts {
        hasher.update(part);
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    Hash(out)
}
