//! Wallet operations: payments and the name-auction covenants
//!
//! Each operation validates the name locally, asks the node for the auction
//! view and current height, checks the phase it needs, then builds, funds,
//! signs and broadcasts one transaction while holding the account lock.
//!
//! Broadcasting persists the transaction first (unconfirmed, inputs marked
//! spent, bid blinds stored) so a concurrent funding attempt can never pick
//! the same coins. If the node rejects it, or it does not reach the mempool
//! in time, every one of those writes is reverted.

use super::Account;
use crate::{Error, Result};
use hsw_core::{
    fee_rate_from_estimate, names, Address, AddressPath, Block, Branch, Covenant, CovenantType,
    Encodable, FundingCoin, Hash, NameState, Output, Transaction, TxBuilder, MAX_RESOURCE_SIZE,
};
use hsw_storage_sqlite::{
    BlindRow, BlindStorage, CoinRow, CoinStorage, NameHistoryRow, NameStorage, TransactionStorage,
};
use hsw_sync::NameInfo;
use tracing::{debug, error, info, warn};

/// Node view of a name plus the chain height it was read at
struct NameContext {
    name: String,
    name_hash: Hash,
    tip: u32,
    info: Option<NameInfo>,
}

impl NameContext {
    fn next_height(&self) -> u32 {
        self.tip.saturating_add(1)
    }

    fn info(&self) -> Result<&NameInfo> {
        self.info
            .as_ref()
            .ok_or_else(|| Error::NameNotFound(self.name.clone()))
    }

    fn require(&self, state: NameState) -> Result<&NameInfo> {
        let info = self.info()?;
        if info.state != state {
            return Err(Error::InvalidState(format!(
                "{} is {}, expected {}",
                self.name, info.state, state
            )));
        }
        Ok(info)
    }

    fn require_not_transferring(&self) -> Result<&NameInfo> {
        let info = self.require(NameState::Closed)?;
        if info.is_transferring() {
            return Err(Error::InvalidState(format!(
                "{} is being transferred",
                self.name
            )));
        }
        Ok(info)
    }
}

impl Account {
    async fn name_context(&self, name: &str) -> Result<NameContext> {
        let name_hash = names::checked_name_hash(name)?;
        let tip = self.client.get_info().await?.height;
        names::ensure_rollout(
            name,
            &name_hash,
            tip.saturating_add(1),
            &self.network.consensus.names,
        )?;
        let info = self.client.get_name_info(name).await?;
        Ok(NameContext {
            name: name.to_string(),
            name_hash,
            tip,
            info,
        })
    }

    fn ensure_can_sign(&self) -> Result<()> {
        let keyring = self.keyring.lock();
        if keyring.is_watch_only() {
            return Err(Error::WatchOnly);
        }
        if keyring.is_locked() {
            return Err(hsw_core::Error::WalletLocked.into());
        }
        Ok(())
    }

    fn check_amount(&self, value: u64) -> Result<()> {
        if !self.network.consensus.is_valid_amount(value) {
            return Err(hsw_core::Error::InvalidAmount(format!(
                "{} exceeds the money supply",
                value
            ))
            .into());
        }
        Ok(())
    }

    fn funding_coin(&self, coin: &CoinRow) -> Result<FundingCoin> {
        Ok(FundingCoin {
            outpoint: coin.outpoint,
            value: coin.value,
            address: Address::decode(&self.network, &coin.address)?,
            path: AddressPath::new(coin.branch, coin.index),
            covenant_type: coin.covenant_type(),
        })
    }

    fn next_receive(&self) -> Result<(AddressPath, Address)> {
        self.with_conn(|conn| self.addrs.gen_address(conn, Branch::Receive))
    }

    /// Our unspent coin holding the name's owner output
    fn owner_coin(&self, ctx: &NameContext) -> Result<CoinRow> {
        let owner = ctx.info()?.owner;
        let coin = self.with_conn(|conn| Ok(CoinStorage::new(conn).get(self.id, &owner)?))?;
        match coin {
            Some(coin) if coin.is_unspent() => Ok(coin),
            _ => Err(Error::NotOwner(ctx.name.clone())),
        }
    }

    /// Coins behind history entries, restricted to the current auction
    fn auction_coins(&self, entries: Vec<NameHistoryRow>, auction_height: u32) -> Result<Vec<CoinRow>> {
        self.with_conn(|conn| {
            let coins = CoinStorage::new(conn);
            let mut found = Vec::with_capacity(entries.len());
            for entry in entries {
                if let Some(coin) = coins.get(self.id, &entry.outpoint)? {
                    let height = match &coin.covenant {
                        Covenant::Bid { height, .. } | Covenant::Reveal { height, .. } => *height,
                        _ => continue,
                    };
                    if height == auction_height && coin.is_unspent() {
                        found.push(coin);
                    }
                }
            }
            Ok(found)
        })
    }

    async fn fee_rate(&self, requested: Option<u64>) -> u64 {
        if let Some(rate) = requested {
            return self.config.fee.clamp(rate);
        }
        match self.client.estimate_smart_fee(1).await {
            Ok(estimate) => fee_rate_from_estimate(estimate, &self.config.fee),
            Err(e) => {
                warn!("Fee estimate unavailable, using default rate: {}", e);
                self.config.fee.default_rate
            }
        }
    }

    /// Hash of the block at `tip - 2 * renewal_maturity`, computed locally
    async fn renewal_hash(&self, tip: u32) -> Result<Hash> {
        let maturity = self.network.consensus.names.renewal_maturity;
        let height = tip.saturating_sub(maturity.saturating_mul(2));
        let raw = self.client.get_raw_block(height).await?;
        Ok(Block::hash_from_raw(&raw)?)
    }

    /// Fund from spendable coins, sign and broadcast
    async fn complete(
        &self,
        mut builder: TxBuilder,
        tip: u32,
        fee_rate: Option<u64>,
        blinds: &[BlindRow],
    ) -> Result<Hash> {
        self.ensure_can_sign()?;
        let rate = self.fee_rate(fee_rate).await;

        let tx = {
            let db = self.db.lock();
            let conn = db.conn();
            let pool = CoinStorage::new(conn)
                .spendable(self.id, tip.saturating_add(1), &self.network.consensus)?
                .iter()
                .map(|coin| self.funding_coin(coin))
                .collect::<Result<Vec<_>>>()?;

            // Change goes to the next change address, which is only
            // consumed when the funded transaction actually has change
            let change_path = AddressPath::new(Branch::Change, self.addrs.depth(Branch::Change));
            let change = self.addrs.address(change_path)?;
            let funded = builder.fund(&pool, &change, rate)?;
            let tx = builder.sign(&self.keyring.lock())?;
            if funded.change.is_some() {
                self.addrs.gen_address(conn, Branch::Change)?;
            }
            debug!(
                "Funded {} with {} inputs, fee {} at {}/byte",
                tx.txid(),
                tx.inputs.len(),
                funded.fee,
                rate
            );
            tx
        };

        self.broadcast(tx, builder.fee(), blinds).await
    }

    async fn broadcast(&self, tx: Transaction, fee: u64, blinds: &[BlindRow]) -> Result<Hash> {
        let txid = tx.txid();
        let raw = tx.to_bytes();

        {
            let mut db = self.db.lock();
            let dbtx = db.transaction()?;
            TransactionStorage::new(&dbtx).insert_pending(self.id, &txid, &raw, fee)?;
            let coins = CoinStorage::new(&dbtx);
            for input in &tx.inputs {
                coins.mark_spent(self.id, &input.prevout, &txid)?;
            }
            let blind_storage = BlindStorage::new(&dbtx);
            for blind in blinds {
                blind_storage.save(self.id, blind)?;
            }
            dbtx.commit()?;
        }

        if let Err(e) = self.client.send_raw_transaction(&raw).await {
            warn!("Broadcast of {} failed: {}", txid, e);
            self.revert_pending(&txid, blinds);
            return Err(e.into());
        }

        for attempt in 0..self.config.broadcast_polls {
            match self.client.get_raw_mempool().await {
                Ok(mempool) if mempool.contains(&txid) => {
                    info!("Account '{}' broadcast {} (fee {})", self.name, txid, fee);
                    return Ok(txid);
                }
                Ok(_) => {}
                Err(e) => debug!("Mempool poll {} failed: {}", attempt, e),
            }
            tokio::time::sleep(self.config.broadcast_poll_interval).await;
        }

        warn!("Transaction {} never reached the mempool", txid);
        self.revert_pending(&txid, blinds);
        Err(Error::BroadcastTimeout(txid))
    }

    fn revert_pending(&self, txid: &Hash, blinds: &[BlindRow]) {
        let result = (|| -> Result<usize> {
            let mut db = self.db.lock();
            let dbtx = db.transaction()?;
            let released = CoinStorage::new(&dbtx).unmark_spent_by(self.id, txid)?;
            TransactionStorage::new(&dbtx).delete(self.id, txid)?;
            let blind_storage = BlindStorage::new(&dbtx);
            for blind in blinds {
                blind_storage.delete(self.id, &blind.blind)?;
            }
            dbtx.commit()?;
            Ok(released)
        })();
        match result {
            Ok(released) => debug!("Reverted {}: released {} coins", txid, released),
            Err(e) => error!("Failed to revert pending transaction {}: {}", txid, e),
        }
    }

    /// Pay `value` to `address`. `fee_rate` overrides the node estimate.
    pub async fn send(&self, address: &str, value: u64, fee_rate: Option<u64>) -> Result<Hash> {
        let to = Address::decode(&self.network, address)?;
        if value == 0 {
            return Err(Error::InvalidArgument("cannot send zero".to_string()));
        }
        self.check_amount(value)?;

        let _guard = self.scan_lock.lock().await;
        let tip = self.client.get_info().await?.height;
        let mut builder = TxBuilder::new();
        builder.add_output(Output::payment(to, value));
        self.complete(builder, tip, fee_rate, &[]).await
    }

    /// Start an auction for `name`
    pub async fn open(&self, name: &str) -> Result<Hash> {
        let ctx = self.name_context(name).await?;
        let _guard = self.scan_lock.lock().await;
        if let Some(info) = &ctx.info {
            if !info.expired {
                return Err(Error::InvalidState(format!(
                    "{} is already {}",
                    ctx.name, info.state
                )));
            }
        }

        let (_, address) = self.next_receive()?;
        let mut builder = TxBuilder::new();
        builder.add_output(Output {
            value: 0,
            address,
            covenant: Covenant::Open {
                name_hash: ctx.name_hash,
                height: 0,
                name: ctx.name.as_bytes().to_vec(),
            },
        });
        self.complete(builder, ctx.tip, None, &[]).await
    }

    /// Place a blinded bid of `value`, locking `lockup`
    pub async fn bid(&self, name: &str, value: u64, lockup: u64) -> Result<Hash> {
        if value > lockup {
            return Err(Error::InvalidArgument(format!(
                "bid value {} exceeds lockup {}",
                value, lockup
            )));
        }
        self.check_amount(lockup)?;
        let ctx = self.name_context(name).await?;
        let _guard = self.scan_lock.lock().await;
        let info = ctx.require(NameState::Bidding)?;

        let (path, address) = self.next_receive()?;
        let public_key = self.addrs.public_key(path)?;
        let nonce = names::bid_nonce(&address.hash, &public_key, &ctx.name_hash, value);
        let blind = names::blind(value, &nonce);

        let mut builder = TxBuilder::new();
        builder.add_output(Output {
            value: lockup,
            address,
            covenant: Covenant::Bid {
                name_hash: ctx.name_hash,
                height: info.height,
                name: ctx.name.as_bytes().to_vec(),
                blind,
            },
        });
        self.complete(builder, ctx.tip, None, &[BlindRow { blind, value, nonce }])
            .await
    }

    /// Reveal every unrevealed bid for `name`
    pub async fn reveal(&self, name: &str) -> Result<Hash> {
        let ctx = self.name_context(name).await?;
        let _guard = self.scan_lock.lock().await;
        let info = ctx.require(NameState::Reveal)?;

        let bids = self.with_conn(|conn| {
            Ok(NameStorage::new(conn).unrevealed_bids(self.id, &ctx.name_hash)?)
        })?;
        let coins = self.auction_coins(bids, info.height)?;
        if coins.is_empty() {
            return Err(Error::InvalidState(format!("no bids to reveal for {}", ctx.name)));
        }

        let mut builder = TxBuilder::new();
        for coin in &coins {
            let blind = match &coin.covenant {
                Covenant::Bid { blind, .. } => *blind,
                _ => continue,
            };
            let stored = self
                .with_conn(|conn| Ok(BlindStorage::new(conn).get(self.id, &blind)?))?
                .ok_or(Error::MissingBlind(blind))?;

            // Input i is the BID, output i its REVEAL
            let input = builder.add_coin(self.funding_coin(coin)?);
            let output = builder.add_output(Output {
                value: stored.value,
                address: Address::decode(&self.network, &coin.address)?,
                covenant: Covenant::Reveal {
                    name_hash: ctx.name_hash,
                    height: info.height,
                    nonce: stored.nonce,
                },
            });
            debug_assert_eq!(input, output);
        }
        self.complete(builder, ctx.tip, None, &[]).await
    }

    /// Reclaim losing reveals for `name`
    pub async fn redeem(&self, name: &str) -> Result<Hash> {
        let ctx = self.name_context(name).await?;
        let _guard = self.scan_lock.lock().await;
        let info = ctx.require(NameState::Closed)?;

        let reveals = self.with_conn(|conn| {
            Ok(NameStorage::new(conn).unredeemed_reveals(self.id, &ctx.name_hash)?)
        })?;
        let coins: Vec<CoinRow> = self
            .auction_coins(reveals, info.height)?
            .into_iter()
            .filter(|coin| coin.outpoint != info.owner)
            .collect();
        if coins.is_empty() {
            return Err(Error::InvalidState(format!("no reveals to redeem for {}", ctx.name)));
        }

        let mut builder = TxBuilder::new();
        for coin in &coins {
            builder.add_coin(self.funding_coin(coin)?);
            builder.add_output(Output {
                value: coin.value,
                address: Address::decode(&self.network, &coin.address)?,
                covenant: Covenant::Redeem {
                    name_hash: ctx.name_hash,
                    height: info.height,
                },
            });
        }
        self.complete(builder, ctx.tip, None, &[]).await
    }

    /// Set resource data for a won or owned name. The first update after
    /// winning registers the name.
    pub async fn update(&self, name: &str, data: Vec<u8>) -> Result<Hash> {
        if data.len() > MAX_RESOURCE_SIZE {
            return Err(Error::InvalidArgument(format!(
                "resource is {} bytes, limit {}",
                data.len(),
                MAX_RESOURCE_SIZE
            )));
        }
        let ctx = self.name_context(name).await?;
        let _guard = self.scan_lock.lock().await;
        let info = ctx.require_not_transferring()?;
        let coin = self.owner_coin(&ctx)?;

        let (value, covenant) = match coin.covenant_type() {
            CovenantType::Reveal | CovenantType::Claim => (
                info.value,
                Covenant::Register {
                    name_hash: ctx.name_hash,
                    height: info.height,
                    data,
                    renewal_hash: self.renewal_hash(ctx.tip).await?,
                },
            ),
            _ => (
                coin.value,
                Covenant::Update {
                    name_hash: ctx.name_hash,
                    height: info.height,
                    data,
                },
            ),
        };
        self.spend_owner(&ctx, &coin, value, None, covenant).await
    }

    /// Begin transferring `name` to `address`
    pub async fn transfer(&self, name: &str, address: &str) -> Result<Hash> {
        let target = Address::decode(&self.network, address)?;
        let ctx = self.name_context(name).await?;
        let _guard = self.scan_lock.lock().await;
        let info = ctx.require_not_transferring()?;
        let coin = self.owner_coin(&ctx)?;
        self.ensure_registered(&ctx, &coin)?;

        let covenant = Covenant::Transfer {
            name_hash: ctx.name_hash,
            height: info.height,
            address: target,
        };
        self.spend_owner(&ctx, &coin, coin.value, None, covenant).await
    }

    /// Complete a transfer once the lockup has passed
    pub async fn finalize(&self, name: &str) -> Result<Hash> {
        let ctx = self.name_context(name).await?;
        let _guard = self.scan_lock.lock().await;
        let info = ctx.require(NameState::Closed)?;
        if !info.is_transferring() {
            return Err(Error::InvalidState(format!("{} is not being transferred", ctx.name)));
        }
        let unlock = info
            .transfer
            .saturating_add(self.network.consensus.names.transfer_lockup);
        if ctx.next_height() < unlock {
            return Err(Error::InvalidState(format!(
                "{} transfer is locked until height {}",
                ctx.name, unlock
            )));
        }

        let coin = self.owner_coin(&ctx)?;
        let target = match &coin.covenant {
            Covenant::Transfer { address, .. } => address.clone(),
            _ => {
                return Err(Error::InvalidState(format!(
                    "{} owner output is not a transfer",
                    ctx.name
                )))
            }
        };
        let covenant = Covenant::Finalize {
            name_hash: ctx.name_hash,
            height: info.height,
            name: ctx.name.as_bytes().to_vec(),
            flags: 0,
            claimed: info.claimed,
            renewals: info.renewals,
            renewal_hash: self.renewal_hash(ctx.tip).await?,
        };
        self.spend_owner(&ctx, &coin, coin.value, Some(target), covenant)
            .await
    }

    /// Renew `name` before it expires
    pub async fn renew(&self, name: &str) -> Result<Hash> {
        let ctx = self.name_context(name).await?;
        let _guard = self.scan_lock.lock().await;
        let info = ctx.require_not_transferring()?;
        let coin = self.owner_coin(&ctx)?;
        self.ensure_registered(&ctx, &coin)?;

        let earliest = info
            .renewal
            .saturating_add(self.network.consensus.names.tree_interval);
        if ctx.next_height() < earliest {
            return Err(Error::InvalidState(format!(
                "{} cannot be renewed before height {}",
                ctx.name, earliest
            )));
        }

        let covenant = Covenant::Renew {
            name_hash: ctx.name_hash,
            height: info.height,
            renewal_hash: self.renewal_hash(ctx.tip).await?,
        };
        self.spend_owner(&ctx, &coin, coin.value, None, covenant).await
    }

    /// Give up `name` permanently
    pub async fn revoke(&self, name: &str) -> Result<Hash> {
        let ctx = self.name_context(name).await?;
        let _guard = self.scan_lock.lock().await;
        let info = ctx.require(NameState::Closed)?;
        let coin = self.owner_coin(&ctx)?;
        self.ensure_registered(&ctx, &coin)?;

        let covenant = Covenant::Revoke {
            name_hash: ctx.name_hash,
            height: info.height,
        };
        self.spend_owner(&ctx, &coin, coin.value, None, covenant).await
    }

    fn ensure_registered(&self, ctx: &NameContext, coin: &CoinRow) -> Result<()> {
        match coin.covenant_type() {
            CovenantType::Reveal | CovenantType::Claim => Err(Error::InvalidState(format!(
                "{} must be registered first",
                ctx.name
            ))),
            _ => Ok(()),
        }
    }

    /// Spend the owner coin into `covenant` at the same index. The output goes
    /// back to the coin's own address unless `to` says otherwise.
    async fn spend_owner(
        &self,
        ctx: &NameContext,
        coin: &CoinRow,
        value: u64,
        to: Option<Address>,
        covenant: Covenant,
    ) -> Result<Hash> {
        let address = match to {
            Some(address) => address,
            None => Address::decode(&self.network, &coin.address)?,
        };
        let mut builder = TxBuilder::new();
        builder.add_coin(self.funding_coin(coin)?);
        builder.add_output(Output {
            value,
            address,
            covenant,
        });
        self.complete(builder, ctx.tip, None, &[]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hsw_core::Outpoint;

    fn context(state: NameState, transfer: u32) -> NameContext {
        NameContext {
            name: "awilauh".to_string(),
            name_hash: names::name_hash("awilauh"),
            tip: 40,
            info: Some(NameInfo {
                name: "awilauh".to_string(),
                name_hash: names::name_hash("awilauh"),
                state,
                height: 5,
                renewal: 5,
                owner: Outpoint::null(),
                value: 0,
                highest: 0,
                data: String::new(),
                transfer,
                revoked: 0,
                claimed: 0,
                renewals: 0,
                registered: false,
                expired: false,
            }),
        }
    }

    #[test]
    fn test_require_state() {
        let ctx = context(NameState::Bidding, 0);
        assert!(ctx.require(NameState::Bidding).is_ok());
        assert!(matches!(
            ctx.require(NameState::Reveal),
            Err(Error::InvalidState(_))
        ));
        assert_eq!(ctx.next_height(), 41);
    }

    #[test]
    fn test_transferring_names_are_rejected() {
        let ctx = context(NameState::Closed, 30);
        assert!(ctx.require(NameState::Closed).is_ok());
        assert!(matches!(
            ctx.require_not_transferring(),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn test_unknown_name() {
        let mut ctx = context(NameState::Closed, 0);
        ctx.info = None;
        assert!(matches!(ctx.info(), Err(Error::NameNotFound(_))));
    }
}
