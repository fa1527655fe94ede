//! Handshake addresses, HD paths and the p2pkh script template

use crate::encoding::{Decodable, Decoder, Encodable, Encoder};
use crate::hash::blake2b160;
use crate::{Error, Result};
use bech32::{Fe32, Hrp};
use hsw_params::Network;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum witness program length accepted on the wire
const MAX_PROGRAM_LEN: usize = 40;

/// Address branch in the HD tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Branch {
    /// External (receive) addresses
    Receive,
    /// Internal (change) addresses
    Change,
}

impl Branch {
    /// Both branches, in derivation order
    pub const ALL: [Branch; 2] = [Branch::Receive, Branch::Change];

    /// BIP-44 change component
    pub const fn index(&self) -> u32 {
        match self {
            Branch::Receive => 0,
            Branch::Change => 1,
        }
    }

    /// Branch from its BIP-44 change component
    pub fn from_index(index: u32) -> Result<Self> {
        match index {
            0 => Ok(Branch::Receive),
            1 => Ok(Branch::Change),
            other => Err(Error::KeyDerivation(format!("unknown branch {}", other))),
        }
    }
}

/// Position of an address below the account key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AddressPath {
    /// Branch
    pub branch: Branch,
    /// Child index within the branch
    pub index: u32,
}

impl AddressPath {
    /// Create a path
    pub const fn new(branch: Branch, index: u32) -> Self {
        Self { branch, index }
    }
}

/// A versioned witness-program address
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    /// Witness version
    pub version: u8,
    /// Witness program (20-byte key hash for p2pkh)
    pub hash: Vec<u8>,
}

impl Address {
    /// Pay-to-pubkey-hash address for a compressed public key
    pub fn from_pubkey(pubkey: &[u8; 33]) -> Self {
        Self {
            version: 0,
            hash: blake2b160(pubkey).to_vec(),
        }
    }

    /// Build from a version and program, validating the program length
    pub fn new(version: u8, hash: Vec<u8>) -> Result<Self> {
        if version > 31 {
            return Err(Error::InvalidAddress(format!("bad witness version {}", version)));
        }
        if hash.len() < 2 || hash.len() > MAX_PROGRAM_LEN {
            return Err(Error::InvalidAddress(format!(
                "bad program length {}",
                hash.len()
            )));
        }
        Ok(Self { version, hash })
    }

    /// True for version-0 20-byte key hashes
    pub fn is_pubkey_hash(&self) -> bool {
        self.version == 0 && self.hash.len() == 20
    }

    /// p2pkh script used for signature hashing
    pub fn p2pkh_script(&self) -> Result<Vec<u8>> {
        if !self.is_pubkey_hash() {
            return Err(Error::TransactionSigning(
                "only pubkey-hash addresses can be signed".to_string(),
            ));
        }
        let mut script = Vec::with_capacity(25);
        script.extend_from_slice(&[0x76, 0xc0, 0x14]);
        script.extend_from_slice(&self.hash);
        script.extend_from_slice(&[0x88, 0xac]);
        Ok(script)
    }

    /// Bech32 string for `network`
    pub fn encode(&self, network: &Network) -> Result<String> {
        let hrp = Hrp::parse(network.address_hrp)
            .map_err(|e| Error::InvalidAddress(format!("bad hrp: {}", e)))?;
        let version = Fe32::try_from(self.version)
            .map_err(|e| Error::InvalidAddress(format!("bad version: {}", e)))?;
        bech32::segwit::encode(hrp, version, &self.hash)
            .map_err(|e| Error::InvalidAddress(e.to_string()))
    }

    /// Parse a bech32 string, requiring the HRP of `network`
    pub fn decode(network: &Network, s: &str) -> Result<Self> {
        let (hrp, version, program) =
            bech32::segwit::decode(s).map_err(|e| Error::InvalidAddress(e.to_string()))?;
        if hrp.as_str() != network.address_hrp {
            return Err(Error::InvalidAddress(format!(
                "address prefix '{}' does not match network {}",
                hrp.as_str(),
                network.name
            )));
        }
        Self::new(version.to_u8(), program)
    }

    /// Serialized size on the wire
    pub fn size(&self) -> usize {
        2 + self.hash.len()
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address(v{}:{})", self.version, hex::encode(&self.hash))
    }
}

impl Encodable for Address {
    fn encode_to(&self, encoder: &mut Encoder) {
        encoder.write_u8(self.version);
        encoder.write_u8(self.hash.len() as u8);
        encoder.write_bytes(&self.hash);
    }
}

impl Decodable for Address {
    fn decode_from(decoder: &mut Decoder<'_>) -> Result<Self> {
        let version = decoder.read_u8()?;
        let len = decoder.read_u8()? as usize;
        if len > MAX_PROGRAM_LEN {
            return Err(Error::Decode(format!("address program too long: {}", len)));
        }
        let hash = decoder.read_bytes(len)?;
        Ok(Self { version, hash })
    }
}
