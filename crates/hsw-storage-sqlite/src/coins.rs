//! Owned coins and the balance breakdown

use crate::models::{amount, branch_col, covenant_col, hash_col, opt_hash_col, u64_col, Balance, CoinRow};
use crate::retry::with_busy_retry;
use crate::Result;
use hsw_core::{CovenantType, Encodable, Hash, Outpoint};
use hsw_params::ConsensusParams;
use rusqlite::{params, Connection, OptionalExtension, Row};

const COIN_COLUMNS: &str = "account_id, tx_hash, out_index, value, address, branch, idx, \
     covenant, coinbase, height, spent_by";

fn row_to_coin(row: &Row<'_>) -> rusqlite::Result<CoinRow> {
    Ok(CoinRow {
        account_id: row.get(0)?,
        outpoint: Outpoint::new(hash_col(row, 1)?, row.get(2)?),
        value: u64_col(row, 3)?,
        address: row.get(4)?,
        branch: branch_col(row, 5)?,
        index: row.get(6)?,
        covenant: covenant_col(row, 7)?,
        coinbase: row.get(8)?,
        height: row.get(9)?,
        spent_by: opt_hash_col(row, 10)?,
    })
}

/// Coin storage operations
pub struct CoinStorage<'a> {
    conn: &'a Connection,
}

impl<'a> CoinStorage<'a> {
    /// Create new coin storage
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Insert a coin, or refresh height and coinbase flag if it already exists.
    /// An existing spend marker is preserved.
    pub fn upsert(&self, coin: &CoinRow) -> Result<()> {
        let value = amount(coin.value)?;
        let covenant = coin.covenant.to_bytes();
        let name_hash = coin.covenant.name_hash().map(|h| h.0.to_vec());
        with_busy_retry(|| {
            self.conn.execute(
                r#"
                INSERT INTO coins
                    (account_id, tx_hash, out_index, value, address, branch, idx,
                     covenant_type, covenant, name_hash, coinbase, height, spent_by)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                ON CONFLICT (account_id, tx_hash, out_index) DO UPDATE SET
                    height = excluded.height,
                    coinbase = excluded.coinbase
                "#,
                params![
                    coin.account_id,
                    coin.outpoint.hash.0.as_slice(),
                    coin.outpoint.index,
                    value,
                    coin.address,
                    coin.branch.index(),
                    coin.index,
                    coin.covenant_type() as u8,
                    covenant,
                    name_hash,
                    coin.coinbase,
                    coin.height,
                    coin.spent_by.map(|h| h.0.to_vec()),
                ],
            )?;
            Ok(())
        })
    }

    /// Look up a coin by outpoint
    pub fn get(&self, account_id: i64, outpoint: &Outpoint) -> Result<Option<CoinRow>> {
        with_busy_retry(|| {
            Ok(self
                .conn
                .query_row(
                    &format!(
                        "SELECT {} FROM coins WHERE account_id = ?1 AND tx_hash = ?2 AND out_index = ?3",
                        COIN_COLUMNS
                    ),
                    params![account_id, outpoint.hash.0.as_slice(), outpoint.index],
                    row_to_coin,
                )
                .optional()?)
        })
    }

    /// Record `spender` as the transaction consuming `outpoint`.
    /// Returns false when the outpoint is not ours.
    pub fn mark_spent(&self, account_id: i64, outpoint: &Outpoint, spender: &Hash) -> Result<bool> {
        with_busy_retry(|| {
            let n = self.conn.execute(
                "UPDATE coins SET spent_by = ?4 WHERE account_id = ?1 AND tx_hash = ?2 AND out_index = ?3",
                params![
                    account_id,
                    outpoint.hash.0.as_slice(),
                    outpoint.index,
                    spender.0.as_slice()
                ],
            )?;
            Ok(n > 0)
        })
    }

    /// Clear spend markers set by `spender` (used to revert a failed broadcast)
    pub fn unmark_spent_by(&self, account_id: i64, spender: &Hash) -> Result<usize> {
        with_busy_retry(|| {
            Ok(self.conn.execute(
                "UPDATE coins SET spent_by = NULL WHERE account_id = ?1 AND spent_by = ?2",
                params![account_id, spender.0.as_slice()],
            )?)
        })
    }

    /// Every unspent coin, smallest first
    pub fn unspent(&self, account_id: i64) -> Result<Vec<CoinRow>> {
        self.query(
            &format!(
                "SELECT {} FROM coins WHERE account_id = ?1 AND spent_by IS NULL \
                 ORDER BY value, height, tx_hash, out_index",
                COIN_COLUMNS
            ),
            params![account_id],
        )
    }

    /// Unspent coins usable for funding at `tip`: confirmed, plain-value and mature
    pub fn spendable(&self, account_id: i64, tip: u32, consensus: &ConsensusParams) -> Result<Vec<CoinRow>> {
        Ok(self
            .unspent(account_id)?
            .into_iter()
            .filter(|c| {
                let kind = c.covenant_type();
                c.value > 0
                    && c.height >= 0
                    && matches!(kind, CovenantType::None | CovenantType::Redeem)
                    && (!c.coinbase || consensus.is_mature(c.height as u32, tip))
            })
            .collect())
    }

    /// Split unspent value into the balance buckets
    pub fn balance(&self, account_id: i64, tip: u32, consensus: &ConsensusParams) -> Result<Balance> {
        let mut balance = Balance::default();
        for coin in self.unspent(account_id)? {
            let bucket = match coin.covenant_type() {
                CovenantType::Bid => &mut balance.bid_locked,
                CovenantType::Reveal => &mut balance.reveal_locked,
                kind if kind.is_name_owner() => &mut balance.name_locked,
                _ if coin.coinbase
                    && (coin.height < 0 || !consensus.is_mature(coin.height as u32, tip)) =>
                {
                    &mut balance.immature
                }
                _ => &mut balance.available,
            };
            *bucket = bucket.saturating_add(coin.value);
        }
        Ok(balance)
    }

    /// Delete coins created above `height`
    pub fn delete_above(&self, account_id: i64, height: u32) -> Result<usize> {
        with_busy_retry(|| {
            Ok(self.conn.execute(
                "DELETE FROM coins WHERE account_id = ?1 AND height > ?2",
                params![account_id, height],
            )?)
        })
    }

    fn query<P: rusqlite::Params + Copy>(&self, sql: &str, p: P) -> Result<Vec<CoinRow>> {
        with_busy_retry(|| {
            let mut stmt = self.conn.prepare(sql)?;
            let rows = stmt
                .query_map(p, row_to_coin)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}
