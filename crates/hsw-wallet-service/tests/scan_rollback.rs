//! Chain following: forward scans, reorg rollback and coinbase maturity

mod common;

use async_trait::async_trait;
use common::{account_config, external_address, harness, sync_account, Harness, LOOKAHEAD};
use hsw_core::{Address, AddressPath, BloomFilter, Branch, Hash, Outpoint};
use hsw_params::Network;
use hsw_storage_sqlite::{AccountStorage, Page, SharedDatabase};
use hsw_sync::testing::{funding_transaction, MockNode};
use hsw_sync::{
    BlockMonitor, BlockNotification, CancelToken, MonitorConfig, NameInfo, NodeClient, NodeInfo,
};
use hsw_wallet_service::{Account, AccountState};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// The harness account restored from storage against `client`
fn reload(h: &Harness, client: Arc<dyn NodeClient>) -> Account {
    let row = AccountStorage::new(h.db.lock().conn())
        .load(h.account.id())
        .unwrap();
    Account::load(Arc::clone(&h.db), client, Network::regtest(), account_config(), row).unwrap()
}

fn stored_cursor(db: &SharedDatabase, id: i64) -> u32 {
    AccountStorage::new(db.lock().conn()).load(id).unwrap().rescan_height
}

#[tokio::test]
async fn test_scan_finds_payments_and_advances_depth() {
    let h = harness();
    let outpoint = h.fund(0, 5_000_000, 1).await;
    h.node.mine_empty(3);
    h.sync().await;

    assert_eq!(h.account.rescan_height(), 4);
    assert_eq!(h.account.state(), AccountState::Synced);

    let coins = h.account.coins().unwrap();
    assert_eq!(coins.len(), 1);
    assert_eq!(coins[0].outpoint, outpoint);
    assert_eq!(coins[0].height, 1);
    assert_eq!(h.account.balance().unwrap().available, 5_000_000);

    assert_eq!(h.account.depth(Branch::Receive), 1);
    assert_eq!(h.account.lookahead_tip(Branch::Receive), 1 + LOOKAHEAD);
    assert_eq!(h.account.transactions(Page::default()).unwrap().len(), 1);
}

#[tokio::test]
async fn test_empty_blocks_flush_cursor_at_end() {
    let h = harness();
    h.node.mine_empty(120);
    h.sync().await;

    assert_eq!(h.account.rescan_height(), 120);
    let row = AccountStorage::new(h.db.lock().conn()).load(h.account.id()).unwrap();
    assert_eq!(row.rescan_height, 120);
}

#[tokio::test]
async fn test_repeated_reorg_notification_is_idempotent() {
    let h = harness();
    h.fund(0, 1_000_000, 1).await;
    h.node.mine_empty(2);
    h.fund(1, 2_000_000, 2).await;
    h.node.mine_empty(1);
    h.sync().await;
    assert_eq!(h.account.rescan_height(), 5);

    let reorg = BlockNotification {
        chain_tip: 5,
        common_tip: 3,
    };
    h.account.handle_notification(reorg, &h.cancel).await.unwrap();
    let once = h.account.coins().unwrap();
    h.account.handle_notification(reorg, &h.cancel).await.unwrap();
    let twice = h.account.coins().unwrap();

    assert_eq!(once, twice);
    assert_eq!(twice.len(), 2);
    assert_eq!(h.account.rescan_height(), 5);
    assert_eq!(h.account.balance().unwrap().available, 3_000_000);
}

#[tokio::test]
async fn test_reorg_then_higher_tip_leaves_no_duplicates() {
    let h = harness();
    let kept = h.fund(0, 1_000_000, 1).await;
    h.node.mine_empty(2);
    let orphaned = h.fund(1, 2_000_000, 2).await;
    h.node.mine_empty(1);
    h.sync().await;
    assert_eq!(h.account.rescan_height(), 5);

    // Blocks 4 and 5 are replaced; the new branch pays a different coin
    h.node.reorg(3);
    let replacement = funding_transaction(&h.receive_address(2), 3_000_000, 3);
    h.node.mine(vec![replacement.clone()]);
    h.node.mine_empty(3);

    h.account
        .handle_notification(
            BlockNotification {
                chain_tip: h.node.height(),
                common_tip: 3,
            },
            &h.cancel,
        )
        .await
        .unwrap();

    assert_eq!(h.account.rescan_height(), 7);
    let coins = h.account.coins().unwrap();
    let outpoints: HashSet<_> = coins.iter().map(|c| c.outpoint).collect();
    assert_eq!(coins.len(), outpoints.len());
    assert!(outpoints.contains(&kept));
    assert!(!outpoints.contains(&orphaned));
    assert!(outpoints.contains(&hsw_core::Outpoint::new(replacement.txid(), 0)));
    assert_eq!(h.account.balance().unwrap().available, 4_000_000);

    // The orphaned payment is kept as unconfirmed history
    let pending = h.account.pending_transactions().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].hash, orphaned.hash);
    assert!(pending[0].block_hash.is_none());
}

#[tokio::test]
async fn test_rescan_rebuilds_from_height() {
    let h = harness();
    h.fund(0, 1_000_000, 1).await;
    h.fund(1, 1_000_000, 2).await;
    h.node.mine_empty(2);
    h.sync().await;

    h.account.rescan(0, &h.cancel).await.unwrap();
    assert_eq!(h.account.rescan_height(), 4);
    assert_eq!(h.account.coins().unwrap().len(), 2);
}

#[tokio::test]
async fn test_coinbase_matures_after_two_blocks() {
    let h = harness();
    h.node.mine_with_coinbase(&h.receive_address(0), 2_000_000, Vec::new());
    h.sync().await;

    let balance = h.account.balance().unwrap();
    assert_eq!(balance.immature, 2_000_000);
    assert_eq!(balance.available, 0);

    h.node.mine_empty(1);
    h.sync().await;
    let balance = h.account.balance().unwrap();
    assert_eq!(balance.immature, 0);
    assert_eq!(balance.available, 2_000_000);
    assert!(h.account.coins().unwrap()[0].coinbase);
}

#[tokio::test]
async fn test_payment_beyond_depth_extends_lookahead() {
    let h = harness();
    let last = LOOKAHEAD - 1;
    h.fund(last, 1_000_000, 1).await;
    assert_eq!(h.account.depth(Branch::Receive), LOOKAHEAD);
    assert_eq!(h.account.lookahead_tip(Branch::Receive), 2 * LOOKAHEAD);

    // Only reachable because the previous hit extended the window
    h.fund(2 * LOOKAHEAD - 1, 1_000_000, 2).await;
    assert_eq!(h.account.coins().unwrap().len(), 2);
    assert_eq!(h.account.depth(Branch::Receive), 2 * LOOKAHEAD);

    let bloom = h.account.addresses().bloom();
    let edge = h
        .account
        .addresses()
        .address(AddressPath::new(Branch::Receive, 3 * LOOKAHEAD - 1))
        .unwrap();
    assert!(bloom.contains_address(&edge));
}

#[tokio::test]
async fn test_rollback_keeps_coins_reserved_by_pending_send() {
    let h = harness();
    h.fund(0, 1_000, 1).await;
    h.node.mine_empty(2);
    let large = h.fund(1, 5_000_000, 2).await;
    assert_eq!(h.account.rescan_height(), 4);
    h.unlock();

    h.account
        .send(&external_address(), 2_000_000, None)
        .await
        .unwrap();
    let reserved = h.account.coins().unwrap();
    assert!(!reserved.iter().any(|c| c.outpoint == large));
    let balance = h.account.balance().unwrap();

    // Same chain, but the notification claims block 4 was replaced
    h.account
        .handle_notification(
            BlockNotification {
                chain_tip: 4,
                common_tip: 3,
            },
            &h.cancel,
        )
        .await
        .unwrap();

    assert_eq!(h.account.rescan_height(), 4);
    assert_eq!(h.account.coins().unwrap(), reserved);
    assert_eq!(h.account.pending_transactions().unwrap().len(), 1);
    assert_eq!(h.account.balance().unwrap(), balance);
}

#[tokio::test]
async fn test_reorg_survives_restart_before_delivery() {
    let h = harness();
    let kept = h.fund(0, 1_000_000, 1).await;
    h.node.mine_empty(2);
    let orphaned = h.fund(1, 2_000_000, 2).await;
    h.node.mine_empty(2);
    h.sync().await;
    assert_eq!(h.account.rescan_height(), 6);

    let client: Arc<dyn NodeClient> = h.node.clone();
    let monitor =
        BlockMonitor::new(Arc::clone(&client), Arc::clone(&h.db), MonitorConfig::default()).unwrap();
    assert_eq!(monitor.poll().await.unwrap(), None);

    h.node.reorg(3);
    h.node.mine_empty(3);
    let lost = monitor.poll().await.unwrap().unwrap();
    assert_eq!(
        lost,
        BlockNotification {
            chain_tip: 6,
            common_tip: 3
        }
    );
    // The process stops before the notification reaches the account
    drop(monitor);

    let restarted_monitor =
        BlockMonitor::new(Arc::clone(&client), Arc::clone(&h.db), MonitorConfig::default()).unwrap();
    let notification = restarted_monitor.poll().await.unwrap().unwrap();
    assert_eq!(
        notification,
        BlockNotification {
            chain_tip: 6,
            common_tip: 6
        }
    );

    let account = reload(&h, client);
    account
        .handle_notification(notification, &h.cancel)
        .await
        .unwrap();

    let outpoints: HashSet<_> = account
        .coins()
        .unwrap()
        .iter()
        .map(|c| c.outpoint)
        .collect();
    assert!(outpoints.contains(&kept));
    assert!(!outpoints.contains(&orphaned));
    assert_eq!(account.rescan_height(), 6);
    let row = AccountStorage::new(h.db.lock().conn())
        .load(account.id())
        .unwrap();
    assert_eq!(row.pending_rollback, None);
    assert_eq!(row.rescan_height, 6);
}

#[tokio::test]
async fn test_bloom_false_positives_leave_no_trace() {
    let h = harness();
    let foreign = Address {
        version: 0,
        hash: vec![0x5a; 20],
    };
    let foreign_outpoint = Outpoint::new(Hash([0x77; 32]), 0);
    {
        let db = h.db.lock();
        let accounts = AccountStorage::new(db.conn());
        let row = accounts.load(h.account.id()).unwrap();
        let mut addresses = BloomFilter::from_bytes(row.address_bloom.as_deref().unwrap()).unwrap();
        addresses.insert_address(&foreign);
        accounts
            .set_address_bloom(row.id, &addresses.to_bytes())
            .unwrap();
        let mut outpoints = BloomFilter::for_account();
        outpoints.insert_outpoint(&foreign_outpoint);
        accounts
            .set_outpoint_bloom(row.id, &outpoints.to_bytes())
            .unwrap();
    }
    let account = reload(&h, h.node.clone());

    // Spends the foreign outpoint and pays the foreign address
    let tx = funding_transaction(&foreign, 1_000_000, 0x77);
    assert_eq!(tx.inputs[0].prevout, foreign_outpoint);
    h.node.mine(vec![tx]);
    h.node.mine_empty(1);
    sync_account(&account, &h.node, &h.cancel).await;

    assert!(account.coins().unwrap().is_empty());
    assert!(account.transactions(Page::default()).unwrap().is_empty());
    assert!(account.name_history(None, Page::default()).unwrap().is_empty());
    assert_eq!(account.rescan_height(), 2);
    assert_eq!(stored_cursor(&h.db, account.id()), 2);
    assert_eq!(account.depth(Branch::Receive), 0);
}

/// Serves blocks from a [`MockNode`], records the stored cursor when chosen
/// heights are fetched, and cancels the scan once `cancel_at` is requested
struct InterruptingNode {
    inner: Arc<MockNode>,
    db: SharedDatabase,
    account_id: i64,
    cancel: CancelToken,
    cancel_at: u32,
    watch: Vec<u32>,
    seen: Mutex<Vec<(u32, u32)>>,
}

#[async_trait]
impl NodeClient for InterruptingNode {
    async fn get_info(&self) -> hsw_sync::Result<NodeInfo> {
        self.inner.get_info().await
    }

    async fn get_raw_block(&self, height: u32) -> hsw_sync::Result<Vec<u8>> {
        if self.watch.contains(&height) {
            let cursor = stored_cursor(&self.db, self.account_id);
            self.seen.lock().push((height, cursor));
        }
        if height == self.cancel_at {
            self.cancel.cancel();
        }
        self.inner.get_raw_block(height).await
    }

    async fn get_raw_blocks_batch(&self, start: u32, count: u32) -> hsw_sync::Result<Vec<Vec<u8>>> {
        self.inner.get_raw_blocks_batch(start, count).await
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> hsw_sync::Result<Hash> {
        self.inner.send_raw_transaction(raw).await
    }

    async fn get_raw_mempool(&self) -> hsw_sync::Result<Vec<Hash>> {
        self.inner.get_raw_mempool().await
    }

    async fn estimate_smart_fee(&self, blocks: u32) -> hsw_sync::Result<f64> {
        self.inner.estimate_smart_fee(blocks).await
    }

    async fn get_name_info(&self, name: &str) -> hsw_sync::Result<Option<NameInfo>> {
        self.inner.get_name_info(name).await
    }
}

#[tokio::test]
async fn test_cancelled_scan_keeps_flushed_cursor() {
    let h = harness();
    h.node.mine_empty(120);
    let cancel = CancelToken::new();
    let client = Arc::new(InterruptingNode {
        inner: Arc::clone(&h.node),
        db: Arc::clone(&h.db),
        account_id: h.account.id(),
        cancel: cancel.clone(),
        cancel_at: 73,
        watch: vec![46, 51, 56, 71],
        seen: Mutex::new(Vec::new()),
    });
    let account = reload(&h, client.clone());

    let err = account
        .handle_notification(
            BlockNotification {
                chain_tip: 120,
                common_tip: 120,
            },
            &cancel,
        )
        .await
        .unwrap_err();
    assert!(err.is_cancelled());

    // Empty blocks move the stored cursor every 50 blocks while scanning
    assert_eq!(
        *client.seen.lock(),
        vec![(46, 0), (51, 50), (56, 50), (71, 50)]
    );
    // The batch holding the cancel point finished; its progress is flushed
    assert_eq!(account.rescan_height(), 75);
    assert_eq!(stored_cursor(&h.db, account.id()), 75);

    sync_account(&account, &h.node, &CancelToken::new()).await;
    assert_eq!(stored_cursor(&h.db, account.id()), 120);
}
