#![allow(dead_code)]

use hsw_core::{generate_mnemonic, Address, AddressPath, Branch, FeePolicy, KdfParams, Outpoint};
use hsw_params::Network;
use hsw_storage_sqlite::{Database, SharedDatabase};
use hsw_sync::testing::{funding_transaction, MockNode};
use hsw_sync::{BlockNotification, CancelToken, NodeClient};
use hsw_wallet_service::{Account, AccountConfig, AccountKey, CreateAccount};
use std::sync::Arc;
use std::time::Duration;

pub const LOOKAHEAD: u32 = 10;
pub const PASSPHRASE: &str = "correct horse";

pub fn account_config() -> AccountConfig {
    AccountConfig {
        lookahead: LOOKAHEAD,
        fetch_batch_size: 5,
        empty_flush_interval: 50,
        broadcast_polls: 3,
        broadcast_poll_interval: Duration::from_millis(1),
        fee: FeePolicy::default(),
    }
}

pub struct Harness {
    pub node: Arc<MockNode>,
    pub db: SharedDatabase,
    pub account: Account,
    pub phrase: String,
    pub cancel: CancelToken,
}

pub fn create_account(
    node: &Arc<MockNode>,
    db: &SharedDatabase,
    name: &str,
    key: AccountKey,
) -> Account {
    let client: Arc<dyn NodeClient> = node.clone();
    Account::create(
        Arc::clone(db),
        client,
        Network::regtest(),
        account_config(),
        &CreateAccount {
            name: name.to_string(),
            account_index: 0,
            key,
            rescan_height: 0,
        },
    )
    .unwrap()
}

pub fn harness() -> Harness {
    let node = Arc::new(MockNode::new());
    let db = Database::open_in_memory().unwrap().into_shared();
    let phrase = generate_mnemonic(None).unwrap();
    let account = create_account(
        &node,
        &db,
        "primary",
        AccountKey::Mnemonic {
            phrase: phrase.clone(),
            bip39_passphrase: String::new(),
            passphrase: PASSPHRASE.to_string(),
            kdf: KdfParams::light(),
        },
    );
    Harness {
        node,
        db,
        account,
        phrase,
        cancel: CancelToken::new(),
    }
}

impl Harness {
    /// Deliver a notification for the node's current tip
    pub async fn sync(&self) {
        sync_account(&self.account, &self.node, &self.cancel).await;
    }

    pub fn receive_address(&self, index: u32) -> Address {
        self.account
            .addresses()
            .address(AddressPath::new(Branch::Receive, index))
            .unwrap()
    }

    /// Mine an external payment to receive address `index` and sync
    pub async fn fund(&self, index: u32, value: u64, tag: u8) -> Outpoint {
        let tx = funding_transaction(&self.receive_address(index), value, tag);
        self.node.mine(vec![tx.clone()]);
        self.sync().await;
        Outpoint::new(tx.txid(), 0)
    }

    /// Mine the mempool and sync
    pub async fn confirm(&self) {
        self.node.mine_mempool();
        self.sync().await;
    }

    pub fn unlock(&self) {
        self.account.unlock(PASSPHRASE, None).unwrap();
    }
}

pub async fn sync_account(account: &Account, node: &MockNode, cancel: &CancelToken) {
    let tip = node.height();
    account
        .handle_notification(
            BlockNotification {
                chain_tip: tip,
                common_tip: tip,
            },
            cancel,
        )
        .await
        .unwrap();
}

pub fn external_address() -> String {
    hsw_sync::testing::burn_address()
        .encode(&Network::regtest())
        .unwrap()
}
