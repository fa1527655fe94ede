//! Name-auction covenants attached to transaction outputs
//!
//! On the wire a covenant is a type byte followed by a list of opaque items.
//! In memory every type is a variant of [`Covenant`] with typed fields, and
//! decoding is an exhaustive match on the type byte.

use crate::address::Address;
use crate::encoding::{var_bytes_size, varint_size, Decodable, Decoder, Encodable, Encoder};
use crate::hash::Hash;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum size of name data carried by REGISTER/UPDATE
pub const MAX_RESOURCE_SIZE: usize = 512;

/// Covenant type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[repr(u8)]
pub enum CovenantType {
    /// Plain payment
    None = 0,
    /// Reserved-name claim
    Claim = 1,
    /// Auction open
    Open = 2,
    /// Blinded bid
    Bid = 3,
    /// Bid reveal
    Reveal = 4,
    /// Losing reveal refund
    Redeem = 5,
    /// Winner registration
    Register = 6,
    /// Resource update
    Update = 7,
    /// Renewal
    Renew = 8,
    /// Transfer start
    Transfer = 9,
    /// Transfer completion
    Finalize = 10,
    /// Revocation
    Revoke = 11,
}

impl CovenantType {
    /// Parse a type tag
    pub fn from_u8(value: u8) -> Result<Self> {
        Ok(match value {
            0 => Self::None,
            1 => Self::Claim,
            2 => Self::Open,
            3 => Self::Bid,
            4 => Self::Reveal,
            5 => Self::Redeem,
            6 => Self::Register,
            7 => Self::Update,
            8 => Self::Renew,
            9 => Self::Transfer,
            10 => Self::Finalize,
            11 => Self::Revoke,
            other => {
                return Err(Error::InvalidCovenant(format!("unknown covenant type {}", other)))
            }
        })
    }

    /// Uppercase name
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Claim => "CLAIM",
            Self::Open => "OPEN",
            Self::Bid => "BID",
            Self::Reveal => "REVEAL",
            Self::Redeem => "REDEEM",
            Self::Register => "REGISTER",
            Self::Update => "UPDATE",
            Self::Renew => "RENEW",
            Self::Transfer => "TRANSFER",
            Self::Finalize => "FINALIZE",
            Self::Revoke => "REVOKE",
        }
    }

    /// Outputs of this type may be spent by ordinary sends
    pub const fn is_spendable(&self) -> bool {
        matches!(self, Self::None | Self::Open | Self::Redeem)
    }

    /// Outputs of this type represent ownership of a name
    pub const fn is_name_owner(&self) -> bool {
        matches!(
            self,
            Self::Claim
                | Self::Register
                | Self::Update
                | Self::Renew
                | Self::Transfer
                | Self::Finalize
        )
    }
}

impl fmt::Display for CovenantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded covenant
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Covenant {
    /// No covenant
    None,
    /// Reserved-name claim
    Claim {
        /// Name hash
        name_hash: Hash,
        /// Auction height
        height: u32,
        /// Raw name
        name: Vec<u8>,
        /// Claim flags
        flags: u8,
        /// Claim commitment hash
        commit_hash: Hash,
        /// Claim commitment height
        commit_height: u32,
    },
    /// Open an auction
    Open {
        /// Name hash
        name_hash: Hash,
        /// Always zero on the wire
        height: u32,
        /// Raw name
        name: Vec<u8>,
    },
    /// Blinded bid
    Bid {
        /// Name hash
        name_hash: Hash,
        /// Auction start height
        height: u32,
        /// Raw name
        name: Vec<u8>,
        /// blake2b(value ‖ nonce)
        blind: Hash,
    },
    /// Reveal a bid
    Reveal {
        /// Name hash
        name_hash: Hash,
        /// Auction start height
        height: u32,
        /// Bid nonce
        nonce: Hash,
    },
    /// Refund a losing reveal
    Redeem {
        /// Name hash
        name_hash: Hash,
        /// Auction start height
        height: u32,
    },
    /// Register a won name
    Register {
        /// Name hash
        name_hash: Hash,
        /// Auction start height
        height: u32,
        /// Serialized resource
        data: Vec<u8>,
        /// Recent block hash proving liveness
        renewal_hash: Hash,
    },
    /// Update resource data
    Update {
        /// Name hash
        name_hash: Hash,
        /// Auction start height
        height: u32,
        /// Serialized resource
        data: Vec<u8>,
    },
    /// Renew a name
    Renew {
        /// Name hash
        name_hash: Hash,
        /// Auction start height
        height: u32,
        /// Recent block hash proving liveness
        renewal_hash: Hash,
    },
    /// Begin a transfer
    Transfer {
        /// Name hash
        name_hash: Hash,
        /// Auction start height
        height: u32,
        /// Transfer target
        address: Address,
    },
    /// Complete a transfer
    Finalize {
        /// Name hash
        name_hash: Hash,
        /// Auction start height
        height: u32,
        /// Raw name
        name: Vec<u8>,
        /// Weak/claimed flags
        flags: u8,
        /// Claim count
        claimed: u32,
        /// Renewal count
        renewals: u32,
        /// Recent block hash proving liveness
        renewal_hash: Hash,
    },
    /// Revoke a name
    Revoke {
        /// Name hash
        name_hash: Hash,
        /// Auction start height
        height: u32,
    },
}

fn u32_item(value: u32) -> Vec<u8> {
    value.to_le_bytes().to_vec()
}

struct Items {
    items: Vec<Vec<u8>>,
    kind: CovenantType,
}

impl Items {
    fn expect(&self, count: usize) -> Result<()> {
        if self.items.len() != count {
            return Err(Error::InvalidCovenant(format!(
                "{} expects {} items, got {}",
                self.kind,
                count,
                self.items.len()
            )));
        }
        Ok(())
    }

    fn hash(&self, i: usize) -> Result<Hash> {
        Hash::from_slice(&self.items[i])
            .map_err(|_| Error::InvalidCovenant(format!("{} item {} is not a hash", self.kind, i)))
    }

    fn u32(&self, i: usize) -> Result<u32> {
        let bytes: [u8; 4] = self.items[i].as_slice().try_into().map_err(|_| {
            Error::InvalidCovenant(format!("{} item {} is not a u32", self.kind, i))
        })?;
        Ok(u32::from_le_bytes(bytes))
    }

    fn u8(&self, i: usize) -> Result<u8> {
        match self.items[i].as_slice() {
            [b] => Ok(*b),
            _ => Err(Error::InvalidCovenant(format!(
                "{} item {} is not a u8",
                self.kind, i
            ))),
        }
    }

    fn bytes(&self, i: usize) -> Vec<u8> {
        self.items[i].clone()
    }
}

impl Covenant {
    /// Type tag of this covenant
    pub fn covenant_type(&self) -> CovenantType {
        match self {
            Covenant::None => CovenantType::None,
            Covenant::Claim { .. } => CovenantType::Claim,
            Covenant::Open { .. } => CovenantType::Open,
            Covenant::Bid { .. } => CovenantType::Bid,
            Covenant::Reveal { .. } => CovenantType::Reveal,
            Covenant::Redeem { .. } => CovenantType::Redeem,
            Covenant::Register { .. } => CovenantType::Register,
            Covenant::Update { .. } => CovenantType::Update,
            Covenant::Renew { .. } => CovenantType::Renew,
            Covenant::Transfer { .. } => CovenantType::Transfer,
            Covenant::Finalize { .. } => CovenantType::Finalize,
            Covenant::Revoke { .. } => CovenantType::Revoke,
        }
    }

    /// Name hash, for every covenant except NONE
    pub fn name_hash(&self) -> Option<Hash> {
        match self {
            Covenant::None => None,
            Covenant::Claim { name_hash, .. }
            | Covenant::Open { name_hash, .. }
            | Covenant::Bid { name_hash, .. }
            | Covenant::Reveal { name_hash, .. }
            | Covenant::Redeem { name_hash, .. }
            | Covenant::Register { name_hash, .. }
            | Covenant::Update { name_hash, .. }
            | Covenant::Renew { name_hash, .. }
            | Covenant::Transfer { name_hash, .. }
            | Covenant::Finalize { name_hash, .. }
            | Covenant::Revoke { name_hash, .. } => Some(*name_hash),
        }
    }

    /// Raw name, for covenants that carry it
    pub fn name(&self) -> Option<&[u8]> {
        match self {
            Covenant::Claim { name, .. }
            | Covenant::Open { name, .. }
            | Covenant::Bid { name, .. }
            | Covenant::Finalize { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Opaque item list as it appears on the wire
    pub fn items(&self) -> Vec<Vec<u8>> {
        match self {
            Covenant::None => Vec::new(),
            Covenant::Claim {
                name_hash,
                height,
                name,
                flags,
                commit_hash,
                commit_height,
            } => vec![
                name_hash.0.to_vec(),
                u32_item(*height),
                name.clone(),
                vec![*flags],
                commit_hash.0.to_vec(),
                u32_item(*commit_height),
            ],
            Covenant::Open {
                name_hash,
                height,
                name,
            } => vec![name_hash.0.to_vec(), u32_item(*height), name.clone()],
            Covenant::Bid {
                name_hash,
                height,
                name,
                blind,
            } => vec![
                name_hash.0.to_vec(),
                u32_item(*height),
                name.clone(),
                blind.0.to_vec(),
            ],
            Covenant::Reveal {
                name_hash,
                height,
                nonce,
            } => vec![name_hash.0.to_vec(), u32_item(*height), nonce.0.to_vec()],
            Covenant::Redeem { name_hash, height } | Covenant::Revoke { name_hash, height } => {
                vec![name_hash.0.to_vec(), u32_item(*height)]
            }
            Covenant::Register {
                name_hash,
                height,
                data,
                renewal_hash,
            } => vec![
                name_hash.0.to_vec(),
                u32_item(*height),
                data.clone(),
                renewal_hash.0.to_vec(),
            ],
            Covenant::Update {
                name_hash,
                height,
                data,
            } => vec![name_hash.0.to_vec(), u32_item(*height), data.clone()],
            Covenant::Renew {
                name_hash,
                height,
                renewal_hash,
            } => vec![
                name_hash.0.to_vec(),
                u32_item(*height),
                renewal_hash.0.to_vec(),
            ],
            Covenant::Transfer {
                name_hash,
                height,
                address,
            } => vec![
                name_hash.0.to_vec(),
                u32_item(*height),
                vec![address.version],
                address.hash.clone(),
            ],
            Covenant::Finalize {
                name_hash,
                height,
                name,
                flags,
                claimed,
                renewals,
                renewal_hash,
            } => vec![
                name_hash.0.to_vec(),
                u32_item(*height),
                name.clone(),
                vec![*flags],
                u32_item(*claimed),
                u32_item(*renewals),
                renewal_hash.0.to_vec(),
            ],
        }
    }

    /// Rebuild a covenant from its type tag and item list
    pub fn from_parts(kind: u8, items: Vec<Vec<u8>>) -> Result<Self> {
        let kind = CovenantType::from_u8(kind)?;
        let it = Items { items, kind };
        let covenant = match kind {
            CovenantType::None => {
                it.expect(0)?;
                Covenant::None
            }
            CovenantType::Claim => {
                it.expect(6)?;
                Covenant::Claim {
                    name_hash: it.hash(0)?,
                    height: it.u32(1)?,
                    name: it.bytes(2),
                    flags: it.u8(3)?,
                    commit_hash: it.hash(4)?,
                    commit_height: it.u32(5)?,
                }
            }
            CovenantType::Open => {
                it.expect(3)?;
                Covenant::Open {
                    name_hash: it.hash(0)?,
                    height: it.u32(1)?,
                    name: it.bytes(2),
                }
            }
            CovenantType::Bid => {
                it.expect(4)?;
                Covenant::Bid {
                    name_hash: it.hash(0)?,
                    height: it.u32(1)?,
                    name: it.bytes(2),
                    blind: it.hash(3)?,
                }
            }
            CovenantType::Reveal => {
                it.expect(3)?;
                Covenant::Reveal {
                    name_hash: it.hash(0)?,
                    height: it.u32(1)?,
                    nonce: it.hash(2)?,
                }
            }
            CovenantType::Redeem => {
                it.expect(2)?;
                Covenant::Redeem {
                    name_hash: it.hash(0)?,
                    height: it.u32(1)?,
                }
            }
            CovenantType::Register => {
                it.expect(4)?;
                Covenant::Register {
                    name_hash: it.hash(0)?,
                    height: it.u32(1)?,
                    data: it.bytes(2),
                    renewal_hash: it.hash(3)?,
                }
            }
            CovenantType::Update => {
                it.expect(3)?;
                Covenant::Update {
                    name_hash: it.hash(0)?,
                    height: it.u32(1)?,
                    data: it.bytes(2),
                }
            }
            CovenantType::Renew => {
                it.expect(3)?;
                Covenant::Renew {
                    name_hash: it.hash(0)?,
                    height: it.u32(1)?,
                    renewal_hash: it.hash(2)?,
                }
            }
            CovenantType::Transfer => {
                it.expect(4)?;
                let address = Address::new(it.u8(2)?, it.bytes(3))
                    .map_err(|e| Error::InvalidCovenant(format!("TRANSFER target: {}", e)))?;
                Covenant::Transfer {
                    name_hash: it.hash(0)?,
                    height: it.u32(1)?,
                    address,
                }
            }
            CovenantType::Finalize => {
                it.expect(7)?;
                Covenant::Finalize {
                    name_hash: it.hash(0)?,
                    height: it.u32(1)?,
                    name: it.bytes(2),
                    flags: it.u8(3)?,
                    claimed: it.u32(4)?,
                    renewals: it.u32(5)?,
                    renewal_hash: it.hash(6)?,
                }
            }
            CovenantType::Revoke => {
                it.expect(2)?;
                Covenant::Revoke {
                    name_hash: it.hash(0)?,
                    height: it.u32(1)?,
                }
            }
        };
        Ok(covenant)
    }

    /// Serialized size on the wire
    pub fn size(&self) -> usize {
        let items = self.items();
        1 + varint_size(items.len() as u64)
            + items.iter().map(|i| var_bytes_size(i.len())).sum::<usize>()
    }
}

impl Encodable for Covenant {
    fn encode_to(&self, encoder: &mut Encoder) {
        let items = self.items();
        encoder.write_u8(self.covenant_type() as u8);
        encoder.write_varint(items.len() as u64);
        for item in &items {
            encoder.write_var_bytes(item);
        }
    }
}

impl Decodable for Covenant {
    fn decode_from(decoder: &mut Decoder<'_>) -> Result<Self> {
        let kind = decoder.read_u8()?;
        let count = decoder.read_len()?;
        let mut items = Vec::with_capacity(count.min(16));
        for _ in 0..count {
            items.push(decoder.read_var_bytes()?);
        }
        Covenant::from_parts(kind, items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nh() -> Hash {
        Hash([1u8; 32])
    }

    #[test]
    fn test_every_variant_roundtrips() {
        let covenants = vec![
            Covenant::None,
            Covenant::Open {
                name_hash: nh(),
                height: 0,
                name: b"awilauh".to_vec(),
            },
            Covenant::Bid {
                name_hash: nh(),
                height: 10,
                name: b"awilauh".to_vec(),
                blind: Hash([2u8; 32]),
            },
            Covenant::Reveal {
                name_hash: nh(),
                height: 10,
                nonce: Hash([3u8; 32]),
            },
            Covenant::Redeem {
                name_hash: nh(),
                height: 10,
            },
            Covenant::Register {
                name_hash: nh(),
                height: 10,
                data: vec![0, 1, 2],
                renewal_hash: Hash([4u8; 32]),
            },
            Covenant::Transfer {
                name_hash: nh(),
                height: 10,
                address: Address::new(0, vec![9u8; 20]).unwrap(),
            },
            Covenant::Finalize {
                name_hash: nh(),
                height: 10,
                name: b"awilauh".to_vec(),
                flags: 0,
                claimed: 0,
                renewals: 1,
                renewal_hash: Hash([5u8; 32]),
            },
            Covenant::Revoke {
                name_hash: nh(),
                height: 10,
            },
        ];
        for covenant in covenants {
            let bytes = covenant.to_bytes();
            assert_eq!(bytes.len(), covenant.size());
            assert_eq!(Covenant::from_bytes(&bytes).unwrap(), covenant);
        }
    }

    #[test]
    fn test_unknown_type_is_typed_error() {
        let err = Covenant::from_parts(42, vec![]).unwrap_err();
        assert!(matches!(err, Error::InvalidCovenant(_)));
    }

    #[test]
    fn test_wrong_item_count_rejected() {
        assert!(Covenant::from_parts(CovenantType::Redeem as u8, vec![vec![0u8; 32]]).is_err());
        assert!(Covenant::from_parts(CovenantType::Redeem as u8, vec![vec![0u8; 31], vec![0; 4]]).is_err());
    }

    #[test]
    fn test_spendable_classification() {
        assert!(CovenantType::None.is_spendable());
        assert!(CovenantType::Redeem.is_spendable());
        assert!(!CovenantType::Bid.is_spendable());
        assert!(CovenantType::Transfer.is_name_owner());
        assert!(!CovenantType::Reveal.is_name_owner());
    }
}
