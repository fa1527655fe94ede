//! Gap-limit address lookahead
//!
//! Every address a payer could use (up to `lookahead` past the deepest used
//! index on each branch) is derived, stored and present in the address bloom
//! filter before a scan can reference it. Derivation only needs the account
//! xpub, so the manager keeps working while the keyring is locked.
//!
//! Methods take the connection to write through, which may be an open
//! `rusqlite::Transaction`. If that transaction is later rolled back, call
//! [`AddrManager::reload`] to drop the in-memory state that was never
//! committed.

use crate::Result;
use hsw_core::{Address, AddressPath, BloomFilter, Branch, Keyring, SharedBloom};
use hsw_params::Network;
use hsw_storage_sqlite::{AccountRow, AccountStorage, AddressStorage};
use parking_lot::Mutex;
use rusqlite::Connection;
use std::sync::Arc;
use tracing::debug;

/// Depth and lookahead tip of one branch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BranchState {
    /// Next unused index
    pub depth: u32,
    /// First index not yet derived
    pub tip: u32,
}

/// Per-account address derivation and bloom maintenance
pub struct AddrManager {
    account_id: i64,
    network: Network,
    keyring: Keyring,
    lookahead: u32,
    branches: Mutex<[BranchState; 2]>,
    bloom: SharedBloom,
}

impl std::fmt::Debug for AddrManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddrManager")
            .field("account_id", &self.account_id)
            .field("lookahead", &self.lookahead)
            .field("branches", &*self.branches.lock())
            .finish()
    }
}

fn branch_states(row: &AccountRow) -> [BranchState; 2] {
    Branch::ALL.map(|branch| BranchState {
        depth: row.depth(branch),
        tip: row.tip(branch),
    })
}

fn bloom_from_row(row: &AccountRow) -> Result<BloomFilter> {
    Ok(match &row.address_bloom {
        Some(bytes) => BloomFilter::from_bytes(bytes)?,
        None => BloomFilter::for_account(),
    })
}

impl AddrManager {
    /// Restore from a stored account row
    pub fn load(row: &AccountRow, network: Network) -> Result<Self> {
        let keyring = Keyring::watch_only(network, row.account_index, &row.xpub)?;
        Ok(Self {
            account_id: row.id,
            network,
            keyring,
            lookahead: row.lookahead,
            branches: Mutex::new(branch_states(row)),
            bloom: SharedBloom::new(bloom_from_row(row)?),
        })
    }

    /// Derive the initial lookahead window on both branches
    pub fn init(&self, conn: &Connection) -> Result<()> {
        for branch in Branch::ALL {
            self.inc_lookahead(conn, branch, 0)?;
        }
        Ok(())
    }

    /// Lookahead window size
    pub fn lookahead(&self) -> u32 {
        self.lookahead
    }

    /// Next unused index on `branch`
    pub fn depth(&self, branch: Branch) -> u32 {
        self.branches.lock()[branch.index() as usize].depth
    }

    /// First index on `branch` not yet derived
    pub fn lookahead_tip(&self, branch: Branch) -> u32 {
        self.branches.lock()[branch.index() as usize].tip
    }

    /// Snapshot of the address bloom filter
    pub fn bloom(&self) -> Arc<BloomFilter> {
        self.bloom.snapshot()
    }

    /// Address at `path`
    pub fn address(&self, path: AddressPath) -> Result<Address> {
        Ok(self.keyring.address(path)?)
    }

    /// Compressed public key at `path`
    pub fn public_key(&self, path: AddressPath) -> Result<[u8; 33]> {
        Ok(self.keyring.public_key(path)?)
    }

    /// Hand out the address at the current depth and advance past it
    pub fn gen_address(&self, conn: &Connection, branch: Branch) -> Result<(AddressPath, Address)> {
        let path = AddressPath::new(branch, self.depth(branch));
        let address = self.keyring.address(path)?;
        AddressStorage::new(conn).insert(self.account_id, path, &address.encode(&self.network)?)?;
        self.inc_lookahead(conn, branch, path.index + 1)?;
        debug!("Account {} generated {:?} address {}", self.account_id, branch, path.index);
        Ok((path, address))
    }

    /// Raise `branch` to at least `depth` and derive every address below
    /// `depth + lookahead`. The bloom filter is updated on a copy, persisted,
    /// and only then swapped in.
    pub fn inc_lookahead(&self, conn: &Connection, branch: Branch, depth: u32) -> Result<()> {
        let mut branches = self.branches.lock();
        let slot = branch.index() as usize;
        let current = branches[slot];
        let depth = depth.max(current.depth);
        let target = depth.saturating_add(self.lookahead).max(current.tip);
        if depth == current.depth && target == current.tip {
            return Ok(());
        }

        let addresses = AddressStorage::new(conn);
        let mut derived = Vec::with_capacity((target - current.tip) as usize);
        for index in current.tip..target {
            let path = AddressPath::new(branch, index);
            let address = self.keyring.address(path)?;
            addresses.insert(self.account_id, path, &address.encode(&self.network)?)?;
            derived.push(address);
        }

        let accounts = AccountStorage::new(conn);
        if !derived.is_empty() {
            self.bloom.update(
                |filter: &mut BloomFilter| {
                    for address in &derived {
                        filter.insert_address(address);
                    }
                },
                |filter: &BloomFilter| accounts.set_address_bloom(self.account_id, &filter.to_bytes()),
            )?;
        }
        accounts.set_branch_state(self.account_id, branch, depth, target)?;
        branches[slot] = BranchState { depth, tip: target };

        debug!(
            "Account {} {:?} lookahead: depth {} tip {} (+{})",
            self.account_id,
            branch,
            depth,
            target,
            derived.len()
        );
        Ok(())
    }

    /// Derivation path of an owned address, resolved through storage
    pub fn path_of(&self, conn: &Connection, address: &Address) -> Result<Option<AddressPath>> {
        Ok(AddressStorage::new(conn).path_of(self.account_id, &address.encode(&self.network)?)?)
    }

    /// Reset branch state and bloom filter to what storage holds
    pub fn reload(&self, conn: &Connection) -> Result<()> {
        let row = AccountStorage::new(conn).load(self.account_id)?;
        let bloom = bloom_from_row(&row)?;
        *self.branches.lock() = branch_states(&row);
        self.bloom.replace(bloom);
        debug!("Account {} address state reloaded", self.account_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hsw_core::{generate_mnemonic, KdfParams};
    use hsw_storage_sqlite::{Database, NewAccount};

    fn setup(lookahead: u32) -> (Database, AddrManager) {
        let network = Network::regtest();
        let phrase = generate_mnemonic(None).unwrap();
        let keyring =
            Keyring::from_mnemonic(network, 0, &phrase, "", "pass", KdfParams::light()).unwrap();
        let db = Database::open_in_memory().unwrap();
        let id = AccountStorage::new(db.conn())
            .create(&NewAccount {
                name: "default".to_string(),
                network: network.name.to_string(),
                account_index: 0,
                xpub: keyring.account_xpub(),
                sealed_seed: None,
                lookahead,
                rescan_height: 0,
            })
            .unwrap();
        let row = AccountStorage::new(db.conn()).load(id).unwrap();
        let manager = AddrManager::load(&row, network).unwrap();
        manager.init(db.conn()).unwrap();
        (db, manager)
    }

    #[test]
    fn test_init_derives_window() {
        let (db, manager) = setup(5);
        for branch in Branch::ALL {
            assert_eq!(manager.depth(branch), 0);
            assert_eq!(manager.lookahead_tip(branch), 5);
        }
        let bloom = manager.bloom();
        for index in 0..5 {
            let address = manager.address(AddressPath::new(Branch::Receive, index)).unwrap();
            assert!(bloom.contains_address(&address));
            assert_eq!(
                manager.path_of(db.conn(), &address).unwrap(),
                Some(AddressPath::new(Branch::Receive, index))
            );
        }
    }

    #[test]
    fn test_gen_address_advances_depth_and_tip() {
        let (db, manager) = setup(5);
        let (path, address) = manager.gen_address(db.conn(), Branch::Receive).unwrap();
        assert_eq!(path, AddressPath::new(Branch::Receive, 0));
        assert_eq!(manager.depth(Branch::Receive), 1);
        assert_eq!(manager.lookahead_tip(Branch::Receive), 6);
        assert_eq!(manager.depth(Branch::Change), 0);
        assert!(manager.bloom().contains_address(&address));

        let row = AccountStorage::new(db.conn()).load(1).unwrap();
        assert_eq!((row.receive_depth, row.receive_tip), (1, 6));
    }

    #[test]
    fn test_inc_lookahead_never_lowers() {
        let (db, manager) = setup(5);
        manager.inc_lookahead(db.conn(), Branch::Change, 7).unwrap();
        assert_eq!(manager.depth(Branch::Change), 7);
        assert_eq!(manager.lookahead_tip(Branch::Change), 12);
        manager.inc_lookahead(db.conn(), Branch::Change, 3).unwrap();
        assert_eq!(manager.depth(Branch::Change), 7);
        assert_eq!(manager.lookahead_tip(Branch::Change), 12);
    }

    #[test]
    fn test_reload_discards_uncommitted_state() {
        let (mut db, manager) = setup(5);
        {
            let tx = db.transaction().unwrap();
            manager.inc_lookahead(&tx, Branch::Receive, 10).unwrap();
            assert_eq!(manager.lookahead_tip(Branch::Receive), 15);
        }
        manager.reload(db.conn()).unwrap();
        assert_eq!(manager.depth(Branch::Receive), 0);
        assert_eq!(manager.lookahead_tip(Branch::Receive), 5);
        let beyond = manager.address(AddressPath::new(Branch::Receive, 12)).unwrap();
        assert!(manager.path_of(db.conn(), &beyond).unwrap().is_none());
    }
}
