//! Database models

use hsw_core::{Branch, Covenant, CovenantType, Decodable, Hash, NameAction, NameStatus, Outpoint};
use rusqlite::types::Type;
use rusqlite::Row;
use serde::{Deserialize, Serialize};

/// Height stored for unconfirmed rows
pub const UNCONFIRMED_HEIGHT: i64 = -1;

/// Account record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRow {
    /// Account ID
    pub id: i64,
    /// Account name
    pub name: String,
    /// Network the account was created on
    pub network: String,
    /// BIP-44 account index
    pub account_index: u32,
    /// Account extended public key
    pub xpub: String,
    /// Encrypted seed; `None` for watch-only accounts
    pub sealed_seed: Option<Vec<u8>>,
    /// Receive branch depth (next unused index)
    pub receive_depth: u32,
    /// Change branch depth
    pub change_depth: u32,
    /// Receive branch lookahead tip (first underived index)
    pub receive_tip: u32,
    /// Change branch lookahead tip
    pub change_tip: u32,
    /// Lookahead window size
    pub lookahead: u32,
    /// Highest block whose effects are stored
    pub rescan_height: u32,
    /// Serialized address bloom filter
    pub address_bloom: Option<Vec<u8>>,
    /// Serialized outpoint bloom filter
    pub outpoint_bloom: Option<Vec<u8>>,
    /// Created timestamp
    pub created_at: i64,
    /// Height a detected reorg requires rolling back to
    pub pending_rollback: Option<u32>,
}

impl AccountRow {
    /// Depth of `branch`
    pub fn depth(&self, branch: Branch) -> u32 {
        match branch {
            Branch::Receive => self.receive_depth,
            Branch::Change => self.change_depth,
        }
    }

    /// Lookahead tip of `branch`
    pub fn tip(&self, branch: Branch) -> u32 {
        match branch {
            Branch::Receive => self.receive_tip,
            Branch::Change => self.change_tip,
        }
    }
}

/// Parameters for creating an account
#[derive(Debug, Clone)]
pub struct NewAccount {
    /// Account name
    pub name: String,
    /// Network name
    pub network: String,
    /// BIP-44 account index
    pub account_index: u32,
    /// Account extended public key
    pub xpub: String,
    /// Encrypted seed
    pub sealed_seed: Option<Vec<u8>>,
    /// Lookahead window
    pub lookahead: u32,
    /// Starting rescan height
    pub rescan_height: u32,
}

/// Stored address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRow {
    /// Account ID
    pub account_id: i64,
    /// Branch
    pub branch: Branch,
    /// Index within the branch
    pub index: u32,
    /// Encoded address
    pub address: String,
}

/// Owned coin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinRow {
    /// Account ID
    pub account_id: i64,
    /// Outpoint of the output
    pub outpoint: Outpoint,
    /// Value in subunits
    pub value: u64,
    /// Encoded owning address
    pub address: String,
    /// Derivation branch of the owning address
    pub branch: Branch,
    /// Derivation index of the owning address
    pub index: u32,
    /// Covenant carried by the output
    pub covenant: Covenant,
    /// Output of a coinbase transaction
    pub coinbase: bool,
    /// Block height, -1 while unconfirmed
    pub height: i64,
    /// Spending transaction, if spent
    pub spent_by: Option<Hash>,
}

impl CoinRow {
    /// Covenant type tag
    pub fn covenant_type(&self) -> CovenantType {
        self.covenant.covenant_type()
    }

    /// True while unspent
    pub fn is_unspent(&self) -> bool {
        self.spent_by.is_none()
    }
}

/// Name history entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameHistoryRow {
    /// Account ID
    pub account_id: i64,
    /// Name hash
    pub name_hash: Hash,
    /// Name
    pub name: String,
    /// Action
    pub action: NameAction,
    /// Outpoint the entry is keyed by
    pub outpoint: Outpoint,
    /// Output value
    pub value: u64,
    /// Block height
    pub height: i64,
    /// Prior output this one consumes (REVEAL -> BID, REDEEM -> REVEAL, ...)
    pub parent: Option<Outpoint>,
}

/// Per-account name record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameRow {
    /// Account ID
    pub account_id: i64,
    /// Name hash
    pub name_hash: Hash,
    /// Name
    pub name: String,
    /// Locally derived status
    pub status: NameStatus,
    /// Height of the last status change
    pub updated_height: i64,
}

/// Stored transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRow {
    /// Account ID
    pub account_id: i64,
    /// Transaction hash
    pub hash: Hash,
    /// Serialized transaction
    pub raw: Vec<u8>,
    /// Block height, -1 while unconfirmed
    pub height: i64,
    /// Block hash once confirmed
    pub block_hash: Option<Hash>,
    /// Fee paid, known only for our own transactions
    pub fee: Option<u64>,
    /// Created timestamp
    pub created_at: i64,
}

impl TransactionRow {
    /// True until the transaction is seen in a block
    pub fn is_pending(&self) -> bool {
        self.height == UNCONFIRMED_HEIGHT
    }
}

/// Stored bid blind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlindRow {
    /// Blind hash
    pub blind: Hash,
    /// True bid value
    pub value: u64,
    /// Nonce
    pub nonce: Hash,
}

/// Block checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockCheckpoint {
    /// Height
    pub height: u32,
    /// Locally computed block hash
    pub hash: Hash,
}

/// Balance breakdown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// Spendable now
    pub available: u64,
    /// Coinbase outputs below maturity
    pub immature: u64,
    /// Locked in BID outputs
    pub bid_locked: u64,
    /// Locked in REVEAL outputs
    pub reveal_locked: u64,
    /// Locked in name-owner outputs
    pub name_locked: u64,
}

impl Balance {
    /// Sum of every bucket
    pub fn total(&self) -> u64 {
        self.available
            .saturating_add(self.immature)
            .saturating_add(self.bid_locked)
            .saturating_add(self.reveal_locked)
            .saturating_add(self.name_locked)
    }
}

/// Limit/offset pagination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// Maximum rows returned
    pub limit: u32,
    /// Rows skipped
    pub offset: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}

impl Page {
    /// Page `number` (0-based) of `size` rows
    pub fn new(number: u32, size: u32) -> Self {
        Self {
            limit: size,
            offset: number.saturating_mul(size),
        }
    }
}

// Column conversion helpers shared by the storage structs

fn conversion_error(idx: usize, ty: Type, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        ty,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, msg)),
    )
}

pub(crate) fn hash_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Hash> {
    let bytes: Vec<u8> = row.get(idx)?;
    Hash::from_slice(&bytes).map_err(|e| conversion_error(idx, Type::Blob, e.to_string()))
}

pub(crate) fn opt_hash_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Hash>> {
    let bytes: Option<Vec<u8>> = row.get(idx)?;
    bytes
        .map(|b| Hash::from_slice(&b).map_err(|e| conversion_error(idx, Type::Blob, e.to_string())))
        .transpose()
}

pub(crate) fn branch_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Branch> {
    let value: u32 = row.get(idx)?;
    Branch::from_index(value).map_err(|e| conversion_error(idx, Type::Integer, e.to_string()))
}

pub(crate) fn u64_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    let value: i64 = row.get(idx)?;
    u64::try_from(value)
        .map_err(|_| conversion_error(idx, Type::Integer, format!("negative amount {}", value)))
}

pub(crate) fn covenant_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Covenant> {
    let bytes: Vec<u8> = row.get(idx)?;
    Covenant::from_bytes(&bytes).map_err(|e| conversion_error(idx, Type::Blob, e.to_string()))
}

pub(crate) fn parse_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let text: String = row.get(idx)?;
    text.parse()
        .map_err(|e: T::Err| conversion_error(idx, Type::Text, e.to_string()))
}

/// Amounts are stored as SQLite INTEGER (i64)
pub(crate) fn amount(value: u64) -> crate::Result<i64> {
    i64::try_from(value)
        .map_err(|_| crate::Error::Validation(format!("amount {} exceeds i64", value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balance_total() {
        let b = Balance {
            available: 1,
            immature: 2,
            bid_locked: 3,
            reveal_locked: 4,
            name_locked: 5,
        };
        assert_eq!(b.total(), 15);
    }

    #[test]
    fn test_page_offsets() {
        assert_eq!(Page::new(0, 20).offset, 0);
        assert_eq!(Page::new(3, 20).offset, 60);
    }
}
