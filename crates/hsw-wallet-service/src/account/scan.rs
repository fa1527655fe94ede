//! Notification-driven rollback and forward rescan
//!
//! Blocks are fetched in small concurrent batches and bloom-tested before
//! any decoding work touches storage. A block that matches is applied in a
//! single database transaction together with its cursor update; runs of
//! empty blocks only move the cursor every `empty_flush_interval` blocks.

use super::{Account, ScanState};
use crate::Result;
use hsw_core::{
    Block, BloomFilter, Covenant, Decodable, Encodable, Hash, NameAction, Outpoint, Transaction,
};
use hsw_storage_sqlite::{
    rollback_account, AccountStorage, CoinRow, CoinStorage, NameHistoryRow, NameStorage,
    RollbackSummary, TransactionStorage,
};
use hsw_sync::{BlockNotification, CancelToken};
use rusqlite::Connection;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use tracing::{debug, info, warn};

/// Name-history action for an output covenant we received
fn output_action(covenant: &Covenant) -> Option<NameAction> {
    Some(match covenant {
        Covenant::None => return None,
        Covenant::Claim { .. } => NameAction::Claim,
        Covenant::Open { .. } => NameAction::Open,
        Covenant::Bid { .. } => NameAction::Bid,
        Covenant::Reveal { .. } => NameAction::Reveal,
        Covenant::Redeem { .. } => NameAction::Redeem,
        Covenant::Register { .. } => NameAction::Register,
        Covenant::Update { .. } => NameAction::Update,
        Covenant::Renew { .. } => NameAction::Renew,
        Covenant::Transfer { .. } => NameAction::Transfer,
        Covenant::Finalize { .. } => NameAction::FinalizeIn,
        Covenant::Revoke { .. } => NameAction::Revoke,
    })
}

fn lowest(a: Option<u32>, b: Option<u32>) -> Option<u32> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// Output `index` of a name covenant that is not OPEN/BID consumes the input
/// at the same index
fn parent_outpoint(tx: &Transaction, index: usize, covenant: &Covenant) -> Option<Outpoint> {
    match covenant {
        Covenant::None | Covenant::Open { .. } | Covenant::Bid { .. } => None,
        _ => tx.inputs.get(index).map(|input| input.prevout),
    }
}

/// What applying one block changed
#[derive(Debug, Default)]
struct BlockEffects {
    coins: usize,
    spends: usize,
    history: usize,
    new_outpoints: Vec<Outpoint>,
}

impl BlockEffects {
    fn is_empty(&self) -> bool {
        self.coins == 0 && self.spends == 0 && self.history == 0
    }
}

impl Account {
    /// Apply one monitor notification: roll back if our view forked, then
    /// rescan forward to the chain tip.
    pub async fn handle_notification(
        &self,
        notification: BlockNotification,
        cancel: &CancelToken,
    ) -> Result<()> {
        let mut scan = self.scan_lock.lock().await;
        self.chain_tip
            .store(notification.chain_tip, Ordering::Release);

        let mut target = lowest(scan.pending_rollback.take(), self.stored_rollback()?);
        if self.rescan_height() > notification.common_tip
            && notification.chain_tip > notification.common_tip
        {
            target = lowest(target, Some(notification.common_tip));
        }
        if let Some(height) = target {
            self.settle_rollback(&mut scan, height)?;
        }

        self.rescan_forward(notification.chain_tip, cancel).await
    }

    /// Roll back to `height` and rescan to the last known chain tip
    pub async fn rescan(&self, height: u32, cancel: &CancelToken) -> Result<()> {
        let mut scan = self.scan_lock.lock().await;
        let mut tip = self.chain_tip();
        if tip == 0 {
            tip = self.client.get_info().await?.height;
            self.chain_tip.store(tip, Ordering::Release);
        }
        let height = lowest(Some(height), self.stored_rollback()?).unwrap_or(height);
        self.settle_rollback(&mut scan, height)?;
        info!("Account '{}' rescanning from {} to {}", self.name, height, tip);
        self.rescan_forward(tip, cancel).await
    }

    /// Roll back to `height` if anything above it is stored, otherwise just
    /// drop the recorded target
    fn settle_rollback(&self, scan: &mut ScanState, height: u32) -> Result<()> {
        if self.rescan_height() > height {
            self.rollback_locked(scan, height)?;
        } else {
            self.with_conn(|conn| {
                Ok(AccountStorage::new(conn).clear_pending_rollback(self.id, height)?)
            })?;
        }
        Ok(())
    }

    fn rollback_locked(&self, scan: &mut ScanState, height: u32) -> Result<RollbackSummary> {
        self.rolling_back.store(true, Ordering::Release);
        let result = {
            let mut db = self.db.lock();
            rollback_account(&mut db, self.id, height)
        };
        self.rolling_back.store(false, Ordering::Release);

        match result {
            Ok(summary) => {
                self.rescan_height.store(height, Ordering::Release);
                info!(
                    "Account '{}' rolled back to {}: {} coins, {} history rows, {} transactions",
                    self.name, height, summary.coins, summary.history, summary.transactions
                );
                Ok(summary)
            }
            Err(e) => {
                warn!(
                    "Account '{}' rollback to {} failed, will retry: {}",
                    self.name, height, e
                );
                scan.pending_rollback = Some(height);
                Err(e.into())
            }
        }
    }

    async fn rescan_forward(&self, tip: u32, cancel: &CancelToken) -> Result<()> {
        let start = self.rescan_height();
        if start >= tip {
            return Ok(());
        }
        debug!("Account '{}' scanning {}..={}", self.name, start + 1, tip);

        let mut persisted = start;
        let result = self.scan_range(start + 1, tip, &mut persisted, cancel).await;

        // Empty blocks since the last write still count as scanned
        let scanned = self.rescan_height();
        if scanned > persisted {
            let flushed = self.with_conn(|conn| {
                Ok(AccountStorage::new(conn).set_rescan_height(self.id, scanned)?)
            });
            if let Err(e) = flushed {
                warn!("Account '{}' cursor flush failed: {}", self.name, e);
            }
        }

        if result.is_ok() {
            debug!("Account '{}' synced to {}", self.name, tip);
        }
        result
    }

    async fn scan_range(
        &self,
        from: u32,
        to: u32,
        persisted: &mut u32,
        cancel: &CancelToken,
    ) -> Result<()> {
        let batch = self.config.fetch_batch_size.max(1);
        let mut empty_run = 0u32;
        let mut height = from;

        while height <= to {
            cancel.check()?;
            let count = batch.min(to - height + 1);
            let raws = futures::future::try_join_all(
                (height..height + count).map(|h| self.client.get_raw_block(h)),
            )
            .await?;

            for (offset, raw) in raws.iter().enumerate() {
                let block_height = height + offset as u32;
                let block = Block::from_bytes(raw)?;
                if self.apply_block(&block, block_height)? {
                    *persisted = block_height;
                    empty_run = 0;
                } else {
                    empty_run += 1;
                    if empty_run >= self.config.empty_flush_interval {
                        self.with_conn(|conn| {
                            Ok(AccountStorage::new(conn).set_rescan_height(self.id, block_height)?)
                        })?;
                        *persisted = block_height;
                        empty_run = 0;
                    }
                }
                self.rescan_height.store(block_height, Ordering::Release);
            }
            height += count;
        }
        Ok(())
    }

    /// Bloom-test a block and, on a hit, apply it in one transaction.
    /// Returns whether anything was written.
    fn apply_block(&self, block: &Block, height: u32) -> Result<bool> {
        let address_bloom = self.addrs.bloom();
        let outpoint_bloom = self.outpoints.snapshot();
        let hit = block.transactions.iter().any(|tx| {
            (!tx.is_coinbase()
                && tx
                    .inputs
                    .iter()
                    .any(|input| outpoint_bloom.contains_outpoint(&input.prevout)))
                || tx
                    .outputs
                    .iter()
                    .any(|output| address_bloom.contains_address(&output.address))
        });
        if !hit {
            return Ok(false);
        }

        let block_hash = block.hash();
        let mut db = self.db.lock();
        let applied = (|| -> Result<BlockEffects> {
            let tx = db.transaction()?;
            // Coins re-created after a rollback stay reserved by our pending sends
            let pending_spends = TransactionStorage::new(&tx).pending_spends(self.id)?;
            let mut effects = BlockEffects::default();
            for (position, transaction) in block.transactions.iter().enumerate() {
                self.apply_transaction(
                    &tx,
                    transaction,
                    position == 0,
                    height,
                    &block_hash,
                    &outpoint_bloom,
                    &pending_spends,
                    &mut effects,
                )?;
            }

            if !effects.new_outpoints.is_empty() {
                let mut next = (*self.outpoints.snapshot()).clone();
                for outpoint in &effects.new_outpoints {
                    next.insert_outpoint(outpoint);
                }
                AccountStorage::new(&tx).set_outpoint_bloom(self.id, &next.to_bytes())?;
                AccountStorage::new(&tx).set_rescan_height(self.id, height)?;
                tx.commit()?;
                self.outpoints.replace(next);
            } else {
                AccountStorage::new(&tx).set_rescan_height(self.id, height)?;
                tx.commit()?;
            }
            Ok(effects)
        })();

        match applied {
            Ok(effects) => {
                if effects.is_empty() {
                    debug!("Block {} bloom hit was a false positive", height);
                } else {
                    info!(
                        "Account '{}' block {}: {} coins, {} spends, {} name events",
                        self.name, height, effects.coins, effects.spends, effects.history
                    );
                }
                Ok(true)
            }
            Err(e) => {
                if let Err(reload) = self.addrs.reload(db.conn()) {
                    warn!("Address state reload failed: {}", reload);
                }
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_transaction(
        &self,
        conn: &Connection,
        tx: &Transaction,
        coinbase: bool,
        height: u32,
        block_hash: &Hash,
        outpoint_bloom: &BloomFilter,
        pending_spends: &HashMap<Outpoint, Hash>,
        effects: &mut BlockEffects,
    ) -> Result<()> {
        let txid = tx.txid();
        let coins = CoinStorage::new(conn);
        let names = NameStorage::new(conn);
        let mut touched = false;

        if !coinbase {
            for input in &tx.inputs {
                let prevout = input.prevout;
                if !outpoint_bloom.contains_outpoint(&prevout)
                    && !effects.new_outpoints.contains(&prevout)
                {
                    continue;
                }
                let coin = match coins.get(self.id, &prevout)? {
                    Some(coin) => coin,
                    None => {
                        debug!("Outpoint {} bloom false positive", prevout);
                        continue;
                    }
                };
                coins.mark_spent(self.id, &prevout, &txid)?;
                effects.spends += 1;
                touched = true;

                if let Covenant::Transfer { name_hash, .. } = &coin.covenant {
                    if self.record_finalize_out(conn, tx, &txid, name_hash, prevout, height)? {
                        effects.history += 1;
                    }
                }
            }
        }

        let address_bloom = self.addrs.bloom();
        for (index, output) in tx.outputs.iter().enumerate() {
            if !address_bloom.contains_address(&output.address) {
                continue;
            }
            let path = match self.addrs.path_of(conn, &output.address)? {
                Some(path) => path,
                None => {
                    debug!("Address bloom false positive in {}", txid);
                    continue;
                }
            };
            if path.index >= self.addrs.depth(path.branch) {
                self.addrs
                    .inc_lookahead(conn, path.branch, path.index + 1)?;
            }

            let outpoint = Outpoint::new(txid, index as u32);
            coins.upsert(&CoinRow {
                account_id: self.id,
                outpoint,
                value: output.value,
                address: output.address.encode(&self.network)?,
                branch: path.branch,
                index: path.index,
                covenant: output.covenant.clone(),
                coinbase,
                height: i64::from(height),
                spent_by: pending_spends.get(&outpoint).copied(),
            })?;
            effects.coins += 1;
            effects.new_outpoints.push(outpoint);
            touched = true;

            if let Some(action) = output_action(&output.covenant) {
                let entry = self.history_entry(
                    conn,
                    &output.covenant,
                    action,
                    outpoint,
                    output.value,
                    height,
                    parent_outpoint(tx, index, &output.covenant),
                )?;
                if let Some(entry) = entry {
                    names.ensure_name(self.id, &entry.name_hash, &entry.name)?;
                    if names.insert_history(&entry)? {
                        names.apply_action(self.id, &entry.name_hash, action, entry.height)?;
                        effects.history += 1;
                    }
                }
            }
        }

        if touched {
            TransactionStorage::new(conn).upsert_confirmed(
                self.id,
                &txid,
                &tx.to_bytes(),
                height,
                block_hash,
            )?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn history_entry(
        &self,
        conn: &Connection,
        covenant: &Covenant,
        action: NameAction,
        outpoint: Outpoint,
        value: u64,
        height: u32,
        parent: Option<Outpoint>,
    ) -> Result<Option<NameHistoryRow>> {
        let name_hash = match covenant.name_hash() {
            Some(hash) => hash,
            None => return Ok(None),
        };
        let name = self.resolve_name(conn, &name_hash, covenant.name())?;
        Ok(Some(NameHistoryRow {
            account_id: self.id,
            name_hash,
            name,
            action,
            outpoint,
            value,
            height: i64::from(height),
            parent,
        }))
    }

    // Covenants without the raw name fall back to our names table, then to the hash
    fn resolve_name(&self, conn: &Connection, name_hash: &Hash, raw: Option<&[u8]>) -> Result<String> {
        if let Some(raw) = raw {
            return Ok(String::from_utf8_lossy(raw).into_owned());
        }
        Ok(NameStorage::new(conn)
            .get(self.id, name_hash)?
            .map(|row| row.name)
            .unwrap_or_else(|| name_hash.to_hex()))
    }

    /// Our TRANSFER coin was spent; if the spender finalizes the same name to
    /// someone else, record FINALIZE_OUT keyed by the FINALIZE output
    fn record_finalize_out(
        &self,
        conn: &Connection,
        tx: &Transaction,
        txid: &Hash,
        name_hash: &Hash,
        prevout: Outpoint,
        height: u32,
    ) -> Result<bool> {
        let finalize = tx.outputs.iter().enumerate().find(|(_, output)| {
            matches!(&output.covenant, Covenant::Finalize { name_hash: h, .. } if h == name_hash)
        });
        let (index, output) = match finalize {
            Some(found) => found,
            None => return Ok(false),
        };
        // Finalized to one of our own addresses: the output side records FINALIZE_IN
        if self.addrs.bloom().contains_address(&output.address)
            && self.addrs.path_of(conn, &output.address)?.is_some()
        {
            return Ok(false);
        }

        let names = NameStorage::new(conn);
        let name = self.resolve_name(conn, name_hash, output.covenant.name())?;
        names.ensure_name(self.id, name_hash, &name)?;
        let entry = NameHistoryRow {
            account_id: self.id,
            name_hash: *name_hash,
            name,
            action: NameAction::FinalizeOut,
            outpoint: Outpoint::new(*txid, index as u32),
            value: output.value,
            height: i64::from(height),
            parent: Some(prevout),
        };
        if !names.insert_history(&entry)? {
            return Ok(false);
        }
        names.apply_action(self.id, name_hash, NameAction::FinalizeOut, entry.height)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hsw_core::{Address, Input, Output};

    fn covenant_tx(covenants: Vec<Covenant>) -> Transaction {
        Transaction {
            inputs: (0..covenants.len())
                .map(|i| Input::new(Outpoint::new(Hash([i as u8 + 1; 32]), i as u32)))
                .collect(),
            outputs: covenants
                .into_iter()
                .map(|covenant| Output {
                    value: 1,
                    address: Address {
                        version: 0,
                        hash: vec![7u8; 20],
                    },
                    covenant,
                })
                .collect(),
            ..Transaction::default()
        }
    }

    #[test]
    fn test_output_actions() {
        let nh = Hash([1u8; 32]);
        assert_eq!(output_action(&Covenant::None), None);
        assert_eq!(
            output_action(&Covenant::Redeem {
                name_hash: nh,
                height: 1
            }),
            Some(NameAction::Redeem)
        );
        assert_eq!(
            output_action(&Covenant::Finalize {
                name_hash: nh,
                height: 1,
                name: b"a".to_vec(),
                flags: 0,
                claimed: 0,
                renewals: 0,
                renewal_hash: Hash::ZERO,
            }),
            Some(NameAction::FinalizeIn)
        );
    }

    #[test]
    fn test_parent_outpoint_by_index() {
        let nh = Hash([2u8; 32]);
        let tx = covenant_tx(vec![
            Covenant::Bid {
                name_hash: nh,
                height: 1,
                name: b"a".to_vec(),
                blind: Hash::ZERO,
            },
            Covenant::Reveal {
                name_hash: nh,
                height: 1,
                nonce: Hash::ZERO,
            },
        ]);
        assert_eq!(parent_outpoint(&tx, 0, &tx.outputs[0].covenant), None);
        assert_eq!(
            parent_outpoint(&tx, 1, &tx.outputs[1].covenant),
            Some(tx.inputs[1].prevout)
        );
        // A covenant output past the inputs has no parent
        assert_eq!(parent_outpoint(&tx, 5, &tx.outputs[1].covenant), None);
    }
}
