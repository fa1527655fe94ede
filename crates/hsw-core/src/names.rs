//! Name rules: validation, hashing, rollout, blinds and auction states

use crate::hash::{blake2b256, sha3_256, Hash};
use crate::{Error, Result};
use hsw_params::NameParams;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Longest valid name
pub const MAX_NAME_SIZE: usize = 63;

/// Number of rollout buckets
pub const ROLLOUT_WEEKS: u32 = 52;

const BLACKLIST: [&str; 5] = ["example", "invalid", "local", "localhost", "test"];

/// Check charset, length and hyphen placement
pub fn validate_name(name: &str) -> Result<()> {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.len() > MAX_NAME_SIZE {
        return Err(Error::InvalidName(format!(
            "name length must be 1-{}, got {}",
            MAX_NAME_SIZE,
            bytes.len()
        )));
    }
    for (i, &ch) in bytes.iter().enumerate() {
        match ch {
            b'a'..=b'z' | b'0'..=b'9' | b'_' => {}
            b'-' if i == 0 || i == bytes.len() - 1 => {
                return Err(Error::InvalidName(format!(
                    "{}: hyphen not allowed at start or end",
                    name
                )));
            }
            b'-' => {}
            _ => {
                return Err(Error::InvalidName(format!(
                    "{}: invalid character at position {}",
                    name, i
                )));
            }
        }
    }
    if is_blacklisted(name) {
        return Err(Error::ReservedName(name.to_string()));
    }
    Ok(())
}

/// True for names that can never be auctioned
pub fn is_blacklisted(name: &str) -> bool {
    BLACKLIST.contains(&name)
}

/// sha3-256 of the raw name
pub fn name_hash(name: &str) -> Hash {
    sha3_256(&[name.as_bytes()])
}

/// Validate and hash in one step
pub fn checked_name_hash(name: &str) -> Result<Hash> {
    validate_name(name)?;
    Ok(name_hash(name))
}

/// Rollout week: the name hash read as a big-endian integer, mod 52
pub fn rollout_week(name_hash: &Hash) -> u32 {
    let p = 256 % ROLLOUT_WEEKS;
    name_hash
        .0
        .iter()
        .fold(0u32, |acc, &b| (p * acc + b as u32) % ROLLOUT_WEEKS)
}

/// First height at which the name may be opened
pub fn rollout_height(name_hash: &Hash, params: &NameParams) -> u32 {
    params.rollout_height(rollout_week(name_hash))
}

/// True once the name's rollout week has started
pub fn has_rollout(name_hash: &Hash, height: u32, params: &NameParams) -> bool {
    params.no_rollout || height >= rollout_height(name_hash, params)
}

/// Fail with `NameNotRolledOut` before the rollout height
pub fn ensure_rollout(name: &str, name_hash: &Hash, height: u32, params: &NameParams) -> Result<()> {
    if has_rollout(name_hash, height, params) {
        return Ok(());
    }
    Err(Error::NameNotRolledOut(format!(
        "{} becomes available at height {}",
        name,
        rollout_height(name_hash, params)
    )))
}

/// Bid commitment: blake2b-256(value LE ‖ nonce)
pub fn blind(value: u64, nonce: &Hash) -> Hash {
    blake2b256(&[&value.to_le_bytes(), &nonce.0])
}

/// Deterministic bid nonce so a wallet can always reconstruct its own blinds
pub fn bid_nonce(address_hash: &[u8], public_key: &[u8; 33], name_hash: &Hash, value: u64) -> Hash {
    blake2b256(&[address_hash, public_key, &name_hash.0, &value.to_le_bytes()])
}

/// Auction state as reported by the node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NameState {
    /// Opened, bidding not started
    Opening,
    /// Claim lock
    Locked,
    /// Accepting bids
    Bidding,
    /// Accepting reveals
    Reveal,
    /// Auction finished
    Closed,
    /// Revoked by owner
    Revoked,
}

impl NameState {
    /// Uppercase wire name
    pub const fn as_str(&self) -> &'static str {
        match self {
            NameState::Opening => "OPENING",
            NameState::Locked => "LOCKED",
            NameState::Bidding => "BIDDING",
            NameState::Reveal => "REVEAL",
            NameState::Closed => "CLOSED",
            NameState::Revoked => "REVOKED",
        }
    }
}

impl fmt::Display for NameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// History action derived from a covenant seen by the scanner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NameAction {
    /// CLAIM output
    Claim,
    /// OPEN output
    Open,
    /// BID output
    Bid,
    /// REVEAL output
    Reveal,
    /// REDEEM output
    Redeem,
    /// REGISTER output
    Register,
    /// UPDATE output
    Update,
    /// RENEW output
    Renew,
    /// TRANSFER output
    Transfer,
    /// FINALIZE output received by this account
    FinalizeIn,
    /// Our TRANSFER coin spent into a FINALIZE
    FinalizeOut,
    /// REVOKE output
    Revoke,
}

impl NameAction {
    /// Storage representation
    pub const fn as_str(&self) -> &'static str {
        match self {
            NameAction::Claim => "CLAIM",
            NameAction::Open => "OPEN",
            NameAction::Bid => "BID",
            NameAction::Reveal => "REVEAL",
            NameAction::Redeem => "REDEEM",
            NameAction::Register => "REGISTER",
            NameAction::Update => "UPDATE",
            NameAction::Renew => "RENEW",
            NameAction::Transfer => "TRANSFER",
            NameAction::FinalizeIn => "FINALIZE_IN",
            NameAction::FinalizeOut => "FINALIZE_OUT",
            NameAction::Revoke => "REVOKE",
        }
    }

    /// Local ownership status after applying this action
    pub fn apply(&self, current: NameStatus) -> NameStatus {
        match self {
            NameAction::Claim
            | NameAction::Register
            | NameAction::FinalizeIn
            | NameAction::Update
            | NameAction::Renew => NameStatus::Owned,
            NameAction::Transfer => NameStatus::Transferring,
            NameAction::FinalizeOut => NameStatus::Transferred,
            NameAction::Revoke => NameStatus::Revoked,
            NameAction::Open | NameAction::Bid | NameAction::Reveal | NameAction::Redeem => current,
        }
    }
}

impl fmt::Display for NameAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NameAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "CLAIM" => NameAction::Claim,
            "OPEN" => NameAction::Open,
            "BID" => NameAction::Bid,
            "REVEAL" => NameAction::Reveal,
            "REDEEM" => NameAction::Redeem,
            "REGISTER" => NameAction::Register,
            "UPDATE" => NameAction::Update,
            "RENEW" => NameAction::Renew,
            "TRANSFER" => NameAction::Transfer,
            "FINALIZE_IN" => NameAction::FinalizeIn,
            "FINALIZE_OUT" => NameAction::FinalizeOut,
            "REVOKE" => NameAction::Revoke,
            other => return Err(Error::Decode(format!("unknown name action {}", other))),
        })
    }
}

/// Ownership status tracked per account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NameStatus {
    /// Not owned by this account
    #[default]
    Unowned,
    /// Owned and idle
    Owned,
    /// Transfer in progress
    Transferring,
    /// Transferred away
    Transferred,
    /// Revoked
    Revoked,
}

impl NameStatus {
    /// Storage representation
    pub const fn as_str(&self) -> &'static str {
        match self {
            NameStatus::Unowned => "UNOWNED",
            NameStatus::Owned => "OWNED",
            NameStatus::Transferring => "TRANSFERRING",
            NameStatus::Transferred => "TRANSFERRED",
            NameStatus::Revoked => "REVOKED",
        }
    }

    /// Fold a sequence of actions into a final status
    pub fn replay<'a, I>(actions: I) -> NameStatus
    where
        I: IntoIterator<Item = &'a NameAction>,
    {
        actions
            .into_iter()
            .fold(NameStatus::Unowned, |status, action| action.apply(status))
    }
}

impl fmt::Display for NameStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NameStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "UNOWNED" => NameStatus::Unowned,
            "OWNED" => NameStatus::Owned,
            "TRANSFERRING" => NameStatus::Transferring,
            "TRANSFERRED" => NameStatus::Transferred,
            "REVOKED" => NameStatus::Revoked,
            other => return Err(Error::Decode(format!("unknown name status {}", other))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        let longest = "z".repeat(63);
        for name in ["a", "awilauh", "foo-bar", "x_y", "0day", longest.as_str()] {
            assert!(validate_name(name).is_ok(), "{}", name);
        }
    }

    #[test]
    fn test_invalid_names() {
        let too_long = "z".repeat(64);
        for name in ["", "-foo", "foo-", "Foo", "foo.bar", "f o", too_long.as_str()] {
            assert!(matches!(validate_name(name), Err(Error::InvalidName(_))), "{}", name);
        }
    }

    #[test]
    fn test_blacklisted_names() {
        for name in ["example", "invalid", "local", "localhost", "test"] {
            assert!(matches!(validate_name(name), Err(Error::ReservedName(_))));
        }
        assert!(validate_name("tests").is_ok());
    }

    #[test]
    fn test_rollout_week_matches_big_integer_mod() {
        let mut h = Hash::ZERO;
        h.0[31] = 53;
        assert_eq!(rollout_week(&h), 1);

        // 256 mod 52 == 48
        let mut h = Hash::ZERO;
        h.0[30] = 1;
        assert_eq!(rollout_week(&h), 48);

        assert!(rollout_week(&name_hash("awilauh")) < ROLLOUT_WEEKS);
    }

    #[test]
    fn test_rollout_gate() {
        let mut params = NameParams::mainnet();
        params.no_rollout = false;
        let mut h = Hash::ZERO;
        h.0[31] = 2;
        let start = params.auction_start + 2 * params.rollout_interval;
        assert!(!has_rollout(&h, start - 1, &params));
        assert!(has_rollout(&h, start, &params));
        assert!(matches!(
            ensure_rollout("x", &h, start - 1, &params),
            Err(Error::NameNotRolledOut(_))
        ));

        params.no_rollout = true;
        assert!(has_rollout(&h, 0, &params));
    }

    #[test]
    fn test_blind_commits_to_value_and_nonce() {
        let nonce = Hash([3u8; 32]);
        assert_ne!(blind(1, &nonce), blind(2, &nonce));
        assert_ne!(blind(1, &nonce), blind(1, &Hash([4u8; 32])));
        assert_eq!(blind(1, &nonce), blind(1, &nonce));
    }

    #[test]
    fn test_status_replay() {
        use NameAction::*;
        assert_eq!(NameStatus::replay(&[Open, Bid, Reveal]), NameStatus::Unowned);
        assert_eq!(NameStatus::replay(&[Open, Bid, Reveal, Register]), NameStatus::Owned);
        assert_eq!(NameStatus::replay(&[Register, Transfer]), NameStatus::Transferring);
        assert_eq!(
            NameStatus::replay(&[Register, Transfer, FinalizeOut]),
            NameStatus::Transferred
        );
        assert_eq!(NameStatus::replay(&[Register, Revoke]), NameStatus::Revoked);
        assert_eq!(NameStatus::replay(&[Register, Update, Redeem]), NameStatus::Owned);
    }

    #[test]
    fn test_action_string_roundtrip() {
        for action in [NameAction::FinalizeIn, NameAction::FinalizeOut, NameAction::Bid] {
            assert_eq!(action.as_str().parse::<NameAction>().unwrap(), action);
        }
        assert!("BOGUS".parse::<NameStatus>().is_err());
    }
}
