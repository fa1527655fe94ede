//! Handshake wallet core
//!
//! This crate implements the pieces of the wallet that do not touch the
//! network or the database: the wire codec for blocks and transactions,
//! covenants, bech32 addresses, bloom filters, the HD keyring, name rules,
//! fee policy and the transaction builder.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod address;
pub mod block;
pub mod bloom;
pub mod builder;
pub mod covenant;
pub mod encoding;
pub mod error;
pub mod fees;
pub mod hash;
pub mod keys;
pub mod names;
pub mod transaction;

pub use address::{Address, AddressPath, Branch};
pub use block::{Block, BlockHeader, HEADER_SIZE};
pub use bloom::{BloomFilter, SharedBloom, DEFAULT_BLOOM_FP_RATE, DEFAULT_BLOOM_ITEMS};
pub use builder::{estimate_size, FundResult, FundingCoin, TxBuilder, INPUT_SIZE_ESTIMATE};
pub use covenant::{Covenant, CovenantType, MAX_RESOURCE_SIZE};
pub use encoding::{Decodable, Decoder, Encodable, Encoder};
pub use error::{Error, ErrorCategory, Result};
pub use fees::{fee_rate_from_estimate, FeeCalculator, FeePolicy, DEFAULT_FEE_RATE, MAX_FEE, MAX_FEE_RATE, MIN_FEE_RATE};
pub use hash::{blake2b256, sha3_256, Hash};
pub use keys::{generate_mnemonic, KdfParams, Keyring};
pub use names::{NameAction, NameState, NameStatus};
pub use transaction::{Input, Outpoint, Output, Transaction, SIGHASH_ALL};
