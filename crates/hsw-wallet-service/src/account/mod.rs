//! Wallet accounts
//!
//! An `Account` owns its keyring, address manager, outpoint bloom filter
//! and rescan cursor. It follows the chain through monitor notifications
//! (`scan`) and exposes every state-changing wallet operation (`ops`).
//!
//! One async mutex per account serializes notification handling and every
//! mutating operation. The shared database mutex is only ever held for
//! synchronous sections, never across an `.await`.

mod ops;
mod scan;

use crate::addr_manager::AddrManager;
use crate::config::AccountConfig;
use crate::{Error, Result};
use hsw_core::{names, BloomFilter, Branch, Hash, KdfParams, Keyring, SharedBloom};
use hsw_params::Network;
use hsw_storage_sqlite::{
    AccountRow, AccountStorage, Balance, CoinRow, CoinStorage, NameHistoryRow, NameRow,
    NameStorage, NewAccount, Page, SharedDatabase, TransactionRow, TransactionStorage,
};
use hsw_sync::NodeClient;
use rusqlite::Connection;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Key material for a new account
#[derive(Debug, Clone)]
pub enum AccountKey {
    /// Spending account from a BIP-39 phrase; the seed is sealed under `passphrase`
    Mnemonic {
        /// Mnemonic phrase
        phrase: String,
        /// Optional BIP-39 passphrase
        bip39_passphrase: String,
        /// Passphrase that seals the seed
        passphrase: String,
        /// Seed sealing cost
        kdf: KdfParams,
    },
    /// Watch-only account from an account xpub
    WatchOnly {
        /// Serialized account extended public key
        xpub: String,
    },
}

/// Parameters for [`Account::create`]
#[derive(Debug, Clone)]
pub struct CreateAccount {
    /// Unique account name
    pub name: String,
    /// BIP-44 account index
    pub account_index: u32,
    /// Key material
    pub key: AccountKey,
    /// Height the account's history starts after
    pub rescan_height: u32,
}

/// Sync state of an account relative to the last notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountState {
    /// Rescan height equals the chain tip
    Synced,
    /// Rescan height is below the chain tip
    Behind,
    /// A rollback is in progress
    RollingBack,
}

#[derive(Debug, Default)]
pub(crate) struct ScanState {
    pub(crate) pending_rollback: Option<u32>,
}

/// A wallet account
pub struct Account {
    id: i64,
    name: String,
    network: Network,
    config: AccountConfig,
    db: SharedDatabase,
    client: Arc<dyn NodeClient>,
    keyring: parking_lot::Mutex<Keyring>,
    addrs: AddrManager,
    outpoints: SharedBloom,
    rescan_height: AtomicU32,
    chain_tip: AtomicU32,
    rolling_back: AtomicBool,
    scan_lock: tokio::sync::Mutex<ScanState>,
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("network", &self.network.name)
            .field("rescan_height", &self.rescan_height())
            .finish()
    }
}

impl Account {
    /// Create and persist a new account, deriving its initial lookahead
    pub fn create(
        db: SharedDatabase,
        client: Arc<dyn NodeClient>,
        network: Network,
        config: AccountConfig,
        request: &CreateAccount,
    ) -> Result<Self> {
        let keyring = match &request.key {
            AccountKey::Mnemonic {
                phrase,
                bip39_passphrase,
                passphrase,
                kdf,
            } => Keyring::from_mnemonic(
                network,
                request.account_index,
                phrase,
                bip39_passphrase,
                passphrase,
                *kdf,
            )?,
            AccountKey::WatchOnly { xpub } => {
                Keyring::watch_only(network, request.account_index, xpub)?
            }
        };

        let row = {
            let mut guard = db.lock();
            if AccountStorage::new(guard.conn())
                .load_by_name(&request.name)?
                .is_some()
            {
                return Err(Error::AccountExists(request.name.clone()));
            }

            let tx = guard.transaction()?;
            let accounts = AccountStorage::new(&tx);
            let id = accounts.create(&NewAccount {
                name: request.name.clone(),
                network: network.name.to_string(),
                account_index: request.account_index,
                xpub: keyring.account_xpub(),
                sealed_seed: keyring.sealed_seed().map(<[u8]>::to_vec),
                lookahead: config.lookahead,
                rescan_height: request.rescan_height,
            })?;
            AddrManager::load(&accounts.load(id)?, network)?.init(&tx)?;
            let row = accounts.load(id)?;
            tx.commit()?;
            row
        };

        info!(
            "Created account '{}' (id {}, index {}, watch-only {})",
            row.name,
            row.id,
            row.account_index,
            keyring.is_watch_only()
        );
        Self::assemble(db, client, network, config, row, keyring)
    }

    /// Restore a stored account
    pub fn load(
        db: SharedDatabase,
        client: Arc<dyn NodeClient>,
        network: Network,
        config: AccountConfig,
        row: AccountRow,
    ) -> Result<Self> {
        if row.network != network.name {
            return Err(Error::Config(format!(
                "account '{}' belongs to {}, not {}",
                row.name, row.network, network.name
            )));
        }
        let keyring =
            Keyring::from_parts(network, row.account_index, &row.xpub, row.sealed_seed.clone())?;
        Self::assemble(db, client, network, config, row, keyring)
    }

    fn assemble(
        db: SharedDatabase,
        client: Arc<dyn NodeClient>,
        network: Network,
        config: AccountConfig,
        row: AccountRow,
        keyring: Keyring,
    ) -> Result<Self> {
        let outpoints = match &row.outpoint_bloom {
            Some(bytes) => BloomFilter::from_bytes(bytes)?,
            None => BloomFilter::for_account(),
        };
        Ok(Self {
            id: row.id,
            name: row.name.clone(),
            addrs: AddrManager::load(&row, network)?,
            network,
            config,
            db,
            client,
            keyring: parking_lot::Mutex::new(keyring),
            outpoints: SharedBloom::new(outpoints),
            rescan_height: AtomicU32::new(row.rescan_height),
            chain_tip: AtomicU32::new(row.rescan_height),
            rolling_back: AtomicBool::new(false),
            scan_lock: tokio::sync::Mutex::new(ScanState::default()),
        })
    }

    /// Account id
    pub fn id(&self) -> i64 {
        self.id
    }

    /// Account name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Network this account lives on
    pub fn network(&self) -> &Network {
        &self.network
    }

    /// Highest block whose effects are stored
    pub fn rescan_height(&self) -> u32 {
        self.rescan_height.load(Ordering::Acquire)
    }

    /// Chain tip from the last notification
    pub fn chain_tip(&self) -> u32 {
        self.chain_tip.load(Ordering::Acquire)
    }

    /// Current sync state
    pub fn state(&self) -> AccountState {
        if self.rolling_back.load(Ordering::Acquire) {
            AccountState::RollingBack
        } else if self.rescan_height() >= self.chain_tip() {
            AccountState::Synced
        } else {
            AccountState::Behind
        }
    }

    /// Address manager
    pub fn addresses(&self) -> &AddrManager {
        &self.addrs
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let db = self.db.lock();
        f(db.conn())
    }

    // Rollback target recorded by the monitor, if any
    fn stored_rollback(&self) -> Result<Option<u32>> {
        self.with_conn(|conn| Ok(AccountStorage::new(conn).load(self.id)?.pending_rollback))
    }

    // Height the next block will have, from our best knowledge of the tip
    fn next_height(&self) -> u32 {
        self.chain_tip().max(self.rescan_height()).saturating_add(1)
    }

    /// True when the account holds no private keys
    pub fn is_watch_only(&self) -> bool {
        self.keyring.lock().is_watch_only()
    }

    /// True while signing is unavailable
    pub fn is_locked(&self) -> bool {
        self.keyring.lock().is_locked()
    }

    /// Decrypt the seed; `timeout` relocks automatically
    pub fn unlock(&self, passphrase: &str, timeout: Option<Duration>) -> Result<()> {
        Ok(self.keyring.lock().unlock(passphrase, timeout)?)
    }

    /// Drop the decrypted key
    pub fn lock(&self) {
        self.keyring.lock().lock();
    }

    /// Re-seal the seed under a new passphrase and persist it
    pub fn change_passphrase(&self, old: &str, new: &str, kdf: KdfParams) -> Result<()> {
        let sealed = {
            let mut keyring = self.keyring.lock();
            keyring.change_passphrase(old, new, kdf)?;
            keyring.sealed_seed().map(<[u8]>::to_vec)
        };
        if let Some(sealed) = sealed {
            self.with_conn(|conn| Ok(AccountStorage::new(conn).set_sealed_seed(self.id, &sealed)?))?;
        }
        Ok(())
    }

    /// Generate a fresh receive address
    pub fn create_receive_address(&self) -> Result<String> {
        let (_, address) =
            self.with_conn(|conn| self.addrs.gen_address(conn, Branch::Receive))?;
        Ok(address.encode(&self.network)?)
    }

    /// Next unused index on `branch`
    pub fn depth(&self, branch: Branch) -> u32 {
        self.addrs.depth(branch)
    }

    /// First underived index on `branch`
    pub fn lookahead_tip(&self, branch: Branch) -> u32 {
        self.addrs.lookahead_tip(branch)
    }

    /// Balance breakdown at the next block height
    pub fn balance(&self) -> Result<Balance> {
        let height = self.next_height();
        self.with_conn(|conn| {
            Ok(CoinStorage::new(conn).balance(self.id, height, &self.network.consensus)?)
        })
    }

    /// Unspent coins
    pub fn coins(&self) -> Result<Vec<CoinRow>> {
        self.with_conn(|conn| Ok(CoinStorage::new(conn).unspent(self.id)?))
    }

    /// Transactions, pending first then newest first
    pub fn transactions(&self, page: Page) -> Result<Vec<TransactionRow>> {
        self.with_conn(|conn| Ok(TransactionStorage::new(conn).list(self.id, page)?))
    }

    /// Own transactions not yet seen in a block
    pub fn pending_transactions(&self) -> Result<Vec<TransactionRow>> {
        self.with_conn(|conn| Ok(TransactionStorage::new(conn).pending(self.id)?))
    }

    /// Names this account has touched
    pub fn names(&self, page: Page) -> Result<Vec<NameRow>> {
        self.with_conn(|conn| Ok(NameStorage::new(conn).list(self.id, page)?))
    }

    /// Locally derived record for `name`
    pub fn name_record(&self, name: &str) -> Result<Option<NameRow>> {
        let name_hash = names::checked_name_hash(name)?;
        self.with_conn(|conn| Ok(NameStorage::new(conn).get(self.id, &name_hash)?))
    }

    /// Name history, for one name or all of them
    pub fn name_history(&self, name: Option<&str>, page: Page) -> Result<Vec<NameHistoryRow>> {
        let name_hash: Option<Hash> = name.map(names::checked_name_hash).transpose()?;
        self.with_conn(|conn| {
            Ok(NameStorage::new(conn).history(self.id, name_hash.as_ref(), page)?)
        })
    }
}
