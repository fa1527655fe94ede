//! In-memory node for tests
//!
//! `MockNode` keeps a chain of real, encodable blocks and a mempool, and
//! follows name auctions from the covenants it mines so `get_name_info`
//! reports the same phases a regtest node would. Reorgs replace the tip
//! with blocks that hash differently.

use crate::{Error, NameInfo, NodeClient, Result};
use async_trait::async_trait;
use hsw_core::{
    blake2b256, names, Address, Block, BlockHeader, Covenant, Decodable, Encodable, Hash, Input,
    NameState, Outpoint, Output, Transaction,
};
use hsw_params::{NameParams, Network};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// What `send_raw_transaction` does with a valid transaction
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BroadcastMode {
    /// Accept into the mempool
    #[default]
    Relay,
    /// Report success but never show it in the mempool
    Drop,
    /// Fail with an RPC error
    Reject(String),
}

#[derive(Debug, Clone)]
struct TrackedName {
    name: String,
    name_hash: Hash,
    height: u32,
    renewal: u32,
    owner: Outpoint,
    value: u64,
    highest: u64,
    data: Vec<u8>,
    transfer: u32,
    revoked: u32,
    renewals: u32,
    registered: bool,
}

impl TrackedName {
    fn state(&self, next_height: u32, params: &NameParams) -> NameState {
        if self.revoked != 0 {
            return NameState::Revoked;
        }
        let open_end = self.height + params.tree_interval + 1;
        let bid_end = open_end + params.bidding_period;
        let reveal_end = bid_end + params.reveal_period;
        if next_height < open_end {
            NameState::Opening
        } else if next_height < bid_end {
            NameState::Bidding
        } else if next_height < reveal_end {
            NameState::Reveal
        } else {
            NameState::Closed
        }
    }
}

struct MockState {
    blocks: Vec<Block>,
    mempool: Vec<Transaction>,
    fork: u32,
    fee_estimate: f64,
    failures: u32,
    broadcast: BroadcastMode,
    names: HashMap<Hash, TrackedName>,
    name_overrides: HashMap<String, Option<NameInfo>>,
}

/// In-memory chain implementing `NodeClient`
pub struct MockNode {
    network: Network,
    state: Mutex<MockState>,
    block_requests: AtomicU64,
}

impl Default for MockNode {
    fn default() -> Self {
        Self::new()
    }
}

/// Address nobody owns, used for coinbase payouts
pub fn burn_address() -> Address {
    Address {
        version: 0,
        hash: vec![0u8; 20],
    }
}

/// A transaction from outside the wallet paying `value` to `to`. `tag`
/// makes the fake funding outpoint unique.
pub fn funding_transaction(to: &Address, value: u64, tag: u8) -> Transaction {
    Transaction {
        inputs: vec![Input::new(Outpoint::new(Hash([tag; 32]), 0))],
        outputs: vec![Output::payment(to.clone(), value)],
        ..Transaction::default()
    }
}

impl MockNode {
    /// Regtest chain holding only a genesis block
    pub fn new() -> Self {
        Self::with_network(Network::regtest())
    }

    /// Chain for `network`
    pub fn with_network(network: Network) -> Self {
        let node = Self {
            network,
            state: Mutex::new(MockState {
                blocks: Vec::new(),
                mempool: Vec::new(),
                fork: 0,
                fee_estimate: -1.0,
                failures: 0,
                broadcast: BroadcastMode::Relay,
                names: HashMap::new(),
                name_overrides: HashMap::new(),
            }),
            block_requests: AtomicU64::new(0),
        };
        node.mine(Vec::new());
        node
    }

    /// Chain height
    pub fn height(&self) -> u32 {
        (self.state.lock().blocks.len() as u32).saturating_sub(1)
    }

    /// Mine a block with `txs` after a coinbase paying the burn address
    pub fn mine(&self, txs: Vec<Transaction>) -> Hash {
        self.mine_with_coinbase(&burn_address(), 0, txs)
    }

    /// Mine a block whose coinbase pays `value` to `to`
    pub fn mine_with_coinbase(&self, to: &Address, value: u64, txs: Vec<Transaction>) -> Hash {
        let mut state = self.state.lock();
        let height = state.blocks.len() as u32;

        let coinbase = Transaction {
            inputs: vec![Input::new(Outpoint::null())],
            outputs: vec![Output::payment(to.clone(), value)],
            locktime: height,
            ..Transaction::default()
        };
        let mut transactions = Vec::with_capacity(txs.len() + 1);
        transactions.push(coinbase);
        transactions.extend(txs);

        let txids: Vec<Hash> = transactions.iter().map(|tx| tx.txid()).collect();
        let parts: Vec<&[u8]> = txids.iter().map(|h| h.0.as_slice()).collect();

        let mut extra_nonce = [0u8; 24];
        extra_nonce[..4].copy_from_slice(&state.fork.to_le_bytes());
        let header = BlockHeader {
            nonce: height,
            time: 1_580_745_078 + u64::from(height) * 600,
            prev_block: state.blocks.last().map(|b| b.hash()).unwrap_or(Hash::ZERO),
            merkle_root: blake2b256(&parts),
            extra_nonce,
            ..BlockHeader::default()
        };

        let block = Block {
            header,
            transactions,
        };
        let hash = block.hash();
        Self::track_names(&mut state, &block, height);

        // Mined transactions leave the mempool
        state.mempool.retain(|tx| !txids.contains(&tx.txid()));
        state.blocks.push(block);
        hash
    }

    /// Mine `count` blocks without wallet transactions
    pub fn mine_empty(&self, count: u32) {
        for _ in 0..count {
            self.mine(Vec::new());
        }
    }

    /// Mine every mempool transaction into one block
    pub fn mine_mempool(&self) -> Hash {
        let txs = std::mem::take(&mut self.state.lock().mempool);
        self.mine(txs)
    }

    /// Drop every block above `height`. Blocks mined afterwards hash
    /// differently from the ones removed. Name tracking is rebuilt.
    pub fn reorg(&self, height: u32) {
        let mut state = self.state.lock();
        state.blocks.truncate(height as usize + 1);
        state.fork += 1;
        state.names.clear();
        let blocks = state.blocks.clone();
        for (h, block) in blocks.iter().enumerate() {
            Self::track_names(&mut state, block, h as u32);
        }
    }

    /// Decoded block at `height`
    pub fn block(&self, height: u32) -> Option<Block> {
        self.state.lock().blocks.get(height as usize).cloned()
    }

    /// Transactions waiting in the mempool
    pub fn mempool(&self) -> Vec<Transaction> {
        self.state.lock().mempool.clone()
    }

    /// Fee estimate returned by `estimate_smart_fee`, in coins per kB
    pub fn set_fee_estimate(&self, coins_per_kb: f64) {
        self.state.lock().fee_estimate = coins_per_kb;
    }

    /// Fail the next `count` calls with a network error
    pub fn fail_next(&self, count: u32) {
        self.state.lock().failures = count;
    }

    /// Choose how broadcasts are handled
    pub fn set_broadcast_mode(&self, mode: BroadcastMode) {
        self.state.lock().broadcast = mode;
    }

    /// Override the tracked view of `name`
    pub fn set_name_info(&self, name: &str, info: Option<NameInfo>) {
        self.state.lock().name_overrides.insert(name.to_string(), info);
    }

    /// Raw block fetches served so far
    pub fn block_requests(&self) -> u64 {
        self.block_requests.load(Ordering::Relaxed)
    }

    fn take_failure(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.failures > 0 {
            state.failures -= 1;
            return Err(Error::Network("injected failure".into()));
        }
        Ok(())
    }

    fn raw_block(state: &MockState, height: u32) -> Result<Vec<u8>> {
        state
            .blocks
            .get(height as usize)
            .map(|b| b.to_bytes())
            .ok_or_else(|| Error::Rpc {
                code: -8,
                message: format!("Block not found at height {}", height),
            })
    }

    fn track_names(state: &mut MockState, block: &Block, height: u32) {
        for tx in &block.transactions {
            let txid = tx.txid();
            for (index, output) in tx.outputs.iter().enumerate() {
                let outpoint = Outpoint::new(txid, index as u32);
                match &output.covenant {
                    Covenant::Open { name_hash, name, .. } => {
                        let name = String::from_utf8_lossy(name).into_owned();
                        state.names.entry(*name_hash).or_insert(TrackedName {
                            name,
                            name_hash: *name_hash,
                            height,
                            renewal: height,
                            owner: Outpoint::null(),
                            value: 0,
                            highest: 0,
                            data: Vec::new(),
                            transfer: 0,
                            revoked: 0,
                            renewals: 0,
                            registered: false,
                        });
                    }
                    Covenant::Reveal { name_hash, .. } => {
                        if let Some(ns) = state.names.get_mut(name_hash) {
                            if output.value > ns.highest {
                                ns.value = ns.highest;
                                ns.highest = output.value;
                                ns.owner = outpoint;
                            } else if output.value > ns.value {
                                ns.value = output.value;
                            }
                        }
                    }
                    Covenant::Register { name_hash, data, .. } => {
                        if let Some(ns) = state.names.get_mut(name_hash) {
                            ns.owner = outpoint;
                            ns.data = data.clone();
                            ns.registered = true;
                            ns.renewal = height;
                        }
                    }
                    Covenant::Update { name_hash, data, .. } => {
                        if let Some(ns) = state.names.get_mut(name_hash) {
                            ns.owner = outpoint;
                            ns.data = data.clone();
                            ns.transfer = 0;
                        }
                    }
                    Covenant::Renew { name_hash, .. } => {
                        if let Some(ns) = state.names.get_mut(name_hash) {
                            ns.owner = outpoint;
                            ns.renewal = height;
                            ns.renewals += 1;
                        }
                    }
                    Covenant::Transfer { name_hash, .. } => {
                        if let Some(ns) = state.names.get_mut(name_hash) {
                            ns.owner = outpoint;
                            ns.transfer = height;
                        }
                    }
                    Covenant::Finalize { name_hash, .. } => {
                        if let Some(ns) = state.names.get_mut(name_hash) {
                            ns.owner = outpoint;
                            ns.transfer = 0;
                            ns.renewal = height;
                            ns.renewals += 1;
                        }
                    }
                    Covenant::Revoke { name_hash, .. } => {
                        if let Some(ns) = state.names.get_mut(name_hash) {
                            ns.owner = outpoint;
                            ns.transfer = 0;
                            ns.revoked = height;
                        }
                    }
                    Covenant::None
                    | Covenant::Claim { .. }
                    | Covenant::Bid { .. }
                    | Covenant::Redeem { .. } => {}
                }
            }
        }
    }
}

#[async_trait]
impl NodeClient for MockNode {
    async fn get_info(&self) -> Result<crate::NodeInfo> {
        self.take_failure()?;
        Ok(crate::NodeInfo {
            height: self.height(),
            version: "mock".to_string(),
        })
    }

    async fn get_raw_block(&self, height: u32) -> Result<Vec<u8>> {
        self.take_failure()?;
        self.block_requests.fetch_add(1, Ordering::Relaxed);
        Self::raw_block(&self.state.lock(), height)
    }

    async fn get_raw_blocks_batch(&self, start: u32, count: u32) -> Result<Vec<Vec<u8>>> {
        self.take_failure()?;
        self.block_requests.fetch_add(u64::from(count), Ordering::Relaxed);
        let state = self.state.lock();
        (start..start.saturating_add(count))
            .map(|h| Self::raw_block(&state, h))
            .collect()
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<Hash> {
        self.take_failure()?;
        let tx = Transaction::from_bytes(raw)?;
        let txid = tx.txid();
        let mut state = self.state.lock();
        match state.broadcast.clone() {
            BroadcastMode::Relay => {
                if !state.mempool.iter().any(|t| t.txid() == txid) {
                    state.mempool.push(tx);
                }
            }
            BroadcastMode::Drop => {}
            BroadcastMode::Reject(message) => return Err(Error::Rpc { code: -25, message }),
        }
        Ok(txid)
    }

    async fn get_raw_mempool(&self) -> Result<Vec<Hash>> {
        self.take_failure()?;
        Ok(self.state.lock().mempool.iter().map(|tx| tx.txid()).collect())
    }

    async fn estimate_smart_fee(&self, _blocks: u32) -> Result<f64> {
        self.take_failure()?;
        Ok(self.state.lock().fee_estimate)
    }

    async fn get_name_info(&self, name: &str) -> Result<Option<NameInfo>> {
        self.take_failure()?;
        let state = self.state.lock();
        if let Some(info) = state.name_overrides.get(name) {
            return Ok(info.clone());
        }
        let next_height = (state.blocks.len() as u32).max(1);
        let params = self.network.consensus.names;
        Ok(state.names.get(&names::name_hash(name)).map(|ns| NameInfo {
            name: ns.name.clone(),
            name_hash: ns.name_hash,
            state: ns.state(next_height, &params),
            height: ns.height,
            renewal: ns.renewal,
            owner: ns.owner,
            value: ns.value,
            highest: ns.highest,
            data: hex::encode(&ns.data),
            transfer: ns.transfer,
            revoked: ns.revoked,
            claimed: 0,
            renewals: ns.renewals,
            registered: ns.registered,
            expired: false,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_blocks_link_and_decode() {
        let node = MockNode::new();
        node.mine_empty(3);
        assert_eq!(node.get_info().await.unwrap().height, 3);

        let raw = node.get_raw_block(3).await.unwrap();
        let block = Block::from_bytes(&raw).unwrap();
        assert_eq!(block.header.prev_block, node.block(2).unwrap().hash());
        assert!(block.transactions[0].is_coinbase());
        assert!(node.get_raw_block(4).await.is_err());
    }

    #[tokio::test]
    async fn test_reorg_changes_hashes() {
        let node = MockNode::new();
        node.mine_empty(5);
        let before = node.block(5).unwrap().hash();
        node.reorg(4);
        assert_eq!(node.height(), 4);
        node.mine_empty(1);
        assert_ne!(node.block(5).unwrap().hash(), before);
    }

    #[tokio::test]
    async fn test_broadcast_and_mine_clears_mempool() {
        let node = MockNode::new();
        let tx = funding_transaction(&burn_address(), 5, 1);
        let txid = node.send_raw_transaction(&tx.to_bytes()).await.unwrap();
        assert_eq!(node.get_raw_mempool().await.unwrap(), vec![txid]);
        node.mine_mempool();
        assert!(node.get_raw_mempool().await.unwrap().is_empty());

        node.set_broadcast_mode(BroadcastMode::Drop);
        node.send_raw_transaction(&funding_transaction(&burn_address(), 5, 2).to_bytes())
            .await
            .unwrap();
        assert!(node.mempool().is_empty());
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let node = MockNode::new();
        node.fail_next(2);
        assert!(node.get_info().await.unwrap_err().is_retryable());
        assert!(node.get_info().await.is_err());
        assert!(node.get_info().await.is_ok());
    }

    #[tokio::test]
    async fn test_tracks_auction_phases() {
        let node = MockNode::new();
        node.mine_empty(4);
        let nh = names::name_hash("awilauh");
        let mut open = funding_transaction(&burn_address(), 0, 9);
        open.outputs[0].covenant = Covenant::Open {
            name_hash: nh,
            height: 0,
            name: b"awilauh".to_vec(),
        };
        node.mine(vec![open]);

        let params = NameParams::regtest();
        let state = |node: &MockNode| {
            futures::executor::block_on(node.get_name_info("awilauh"))
                .unwrap()
                .unwrap()
                .state
        };
        assert_eq!(state(&node), NameState::Opening);
        node.mine_empty(params.tree_interval + 1);
        assert_eq!(state(&node), NameState::Bidding);
        node.mine_empty(params.bidding_period);
        assert_eq!(state(&node), NameState::Reveal);
        node.mine_empty(params.reveal_period);
        assert_eq!(state(&node), NameState::Closed);

        assert!(node.get_name_info("unopened").await.unwrap().is_none());
    }
}
