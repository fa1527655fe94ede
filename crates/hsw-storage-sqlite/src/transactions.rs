//! Wallet transactions, confirmed and pending

use crate::models::{amount, hash_col, opt_hash_col, Page, TransactionRow, UNCONFIRMED_HEIGHT};
use crate::retry::with_busy_retry;
use crate::Result;
use hsw_core::{Decodable, Hash, Outpoint, Transaction};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;

const TX_COLUMNS: &str = "account_id, hash, raw, height, block_hash, fee, created_at";

fn row_to_tx(row: &Row<'_>) -> rusqlite::Result<TransactionRow> {
    let fee: Option<i64> = row.get(5)?;
    Ok(TransactionRow {
        account_id: row.get(0)?,
        hash: hash_col(row, 1)?,
        raw: row.get(2)?,
        height: row.get(3)?,
        block_hash: opt_hash_col(row, 4)?,
        fee: fee.map(|f| f.max(0) as u64),
        created_at: row.get(6)?,
    })
}

/// Transaction storage operations
pub struct TransactionStorage<'a> {
    conn: &'a Connection,
}

impl<'a> TransactionStorage<'a> {
    /// Create new transaction storage
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Record a transaction seen in a block. Confirms a pending row if present
    /// and keeps its fee.
    pub fn upsert_confirmed(&self, account_id: i64, hash: &Hash, raw: &[u8], height: u32, block_hash: &Hash) -> Result<()> {
        let created_at = chrono::Utc::now().timestamp();
        with_busy_retry(|| {
            self.conn.execute(
                r#"
                INSERT INTO transactions (account_id, hash, raw, height, block_hash, fee, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6)
                ON CONFLICT (account_id, hash) DO UPDATE SET
                    height = excluded.height,
                    block_hash = excluded.block_hash
                "#,
                params![
                    account_id,
                    hash.0.as_slice(),
                    raw,
                    height,
                    block_hash.0.as_slice(),
                    created_at
                ],
            )?;
            Ok(())
        })
    }

    /// Record one of our own transactions before broadcast
    pub fn insert_pending(&self, account_id: i64, hash: &Hash, raw: &[u8], fee: u64) -> Result<()> {
        let created_at = chrono::Utc::now().timestamp();
        let fee = amount(fee)?;
        with_busy_retry(|| {
            self.conn.execute(
                r#"
                INSERT INTO transactions (account_id, hash, raw, height, block_hash, fee, created_at)
                VALUES (?1, ?2, ?3, ?4, NULL, ?5, ?6)
                "#,
                params![account_id, hash.0.as_slice(), raw, UNCONFIRMED_HEIGHT, fee, created_at],
            )?;
            Ok(())
        })
    }

    /// Remove a transaction (only used to revert a pending send)
    pub fn delete(&self, account_id: i64, hash: &Hash) -> Result<bool> {
        with_busy_retry(|| {
            let n = self.conn.execute(
                "DELETE FROM transactions WHERE account_id = ?1 AND hash = ?2",
                params![account_id, hash.0.as_slice()],
            )?;
            Ok(n > 0)
        })
    }

    /// Mark transactions above `height` unconfirmed
    pub fn unconfirm_above(&self, account_id: i64, height: u32) -> Result<usize> {
        with_busy_retry(|| {
            Ok(self.conn.execute(
                "UPDATE transactions SET height = ?3, block_hash = NULL WHERE account_id = ?1 AND height > ?2",
                params![account_id, height, UNCONFIRMED_HEIGHT],
            )?)
        })
    }

    /// Look up one transaction
    pub fn get(&self, account_id: i64, hash: &Hash) -> Result<Option<TransactionRow>> {
        with_busy_retry(|| {
            Ok(self
                .conn
                .query_row(
                    &format!("SELECT {} FROM transactions WHERE account_id = ?1 AND hash = ?2", TX_COLUMNS),
                    params![account_id, hash.0.as_slice()],
                    row_to_tx,
                )
                .optional()?)
        })
    }

    /// Transactions, pending first then newest block first
    pub fn list(&self, account_id: i64, page: Page) -> Result<Vec<TransactionRow>> {
        with_busy_retry(|| {
            let mut stmt = self.conn.prepare(&format!(
                r#"
                SELECT {} FROM transactions
                WHERE account_id = ?1
                ORDER BY (height = -1) DESC, height DESC, created_at DESC, hash
                LIMIT ?2 OFFSET ?3
                "#,
                TX_COLUMNS
            ))?;
            let rows = stmt
                .query_map(params![account_id, page.limit, page.offset], row_to_tx)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Pending transactions, oldest first
    pub fn pending(&self, account_id: i64) -> Result<Vec<TransactionRow>> {
        with_busy_retry(|| {
            let mut stmt = self.conn.prepare(&format!(
                "SELECT {} FROM transactions WHERE account_id = ?1 AND height = -1 ORDER BY created_at, hash",
                TX_COLUMNS
            ))?;
            let rows = stmt
                .query_map([account_id], row_to_tx)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Outpoints consumed by pending transactions, mapped to the spender
    pub fn pending_spends(&self, account_id: i64) -> Result<HashMap<Outpoint, Hash>> {
        let mut spends = HashMap::new();
        for row in self.pending(account_id)? {
            let tx = Transaction::from_bytes(&row.raw)?;
            for input in &tx.inputs {
                spends.insert(input.prevout, row.hash);
            }
        }
        Ok(spends)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AccountStorage, Database, NewAccount};

    fn setup() -> (Database, i64) {
        let db = Database::open_in_memory().unwrap();
        let id = AccountStorage::new(db.conn())
            .create(&NewAccount {
                name: "a".to_string(),
                network: "regtest".to_string(),
                account_index: 0,
                xpub: "x".to_string(),
                sealed_seed: None,
                lookahead: 5,
                rescan_height: 0,
            })
            .unwrap();
        (db, id)
    }

    #[test]
    fn test_pending_then_confirmed_keeps_fee() {
        let (db, id) = setup();
        let storage = TransactionStorage::new(db.conn());
        let h = Hash([1u8; 32]);
        storage.insert_pending(id, &h, &[1, 2, 3], 2_500).unwrap();
        assert!(storage.get(id, &h).unwrap().unwrap().is_pending());
        assert_eq!(storage.pending(id).unwrap().len(), 1);

        storage.upsert_confirmed(id, &h, &[1, 2, 3], 7, &Hash([2u8; 32])).unwrap();
        let row = storage.get(id, &h).unwrap().unwrap();
        assert_eq!(row.height, 7);
        assert_eq!(row.fee, Some(2_500));
        assert_eq!(row.block_hash, Some(Hash([2u8; 32])));
        assert!(storage.pending(id).unwrap().is_empty());
    }

    #[test]
    fn test_pending_spends_follow_pending_rows() {
        let (db, id) = setup();
        let storage = TransactionStorage::new(db.conn());
        let prevout = Outpoint::new(Hash([5u8; 32]), 1);
        let tx = Transaction {
            inputs: vec![hsw_core::Input::new(prevout)],
            ..Transaction::default()
        };
        let raw = hsw_core::Encodable::to_bytes(&tx);
        let txid = tx.txid();

        storage.insert_pending(id, &txid, &raw, 100).unwrap();
        let spends = storage.pending_spends(id).unwrap();
        assert_eq!(spends.get(&prevout), Some(&txid));

        storage.upsert_confirmed(id, &txid, &raw, 3, &Hash::ZERO).unwrap();
        assert!(storage.pending_spends(id).unwrap().is_empty());

        // Back to pending after a rollback, the reservation returns
        storage.unconfirm_above(id, 2).unwrap();
        assert_eq!(storage.pending_spends(id).unwrap().len(), 1);
    }

    #[test]
    fn test_unconfirm_above() {
        let (db, id) = setup();
        let storage = TransactionStorage::new(db.conn());
        storage.upsert_confirmed(id, &Hash([1u8; 32]), &[], 5, &Hash::ZERO).unwrap();
        storage.upsert_confirmed(id, &Hash([2u8; 32]), &[], 9, &Hash::ZERO).unwrap();
        assert_eq!(storage.unconfirm_above(id, 6).unwrap(), 1);

        let row = storage.get(id, &Hash([2u8; 32])).unwrap().unwrap();
        assert!(row.is_pending());
        assert!(row.block_hash.is_none());
    }

    #[test]
    fn test_list_orders_pending_first() {
        let (db, id) = setup();
        let storage = TransactionStorage::new(db.conn());
        storage.upsert_confirmed(id, &Hash([1u8; 32]), &[], 5, &Hash::ZERO).unwrap();
        storage.upsert_confirmed(id, &Hash([2u8; 32]), &[], 9, &Hash::ZERO).unwrap();
        storage.insert_pending(id, &Hash([3u8; 32]), &[], 1).unwrap();

        let heights: Vec<i64> = storage
            .list(id, Page::default())
            .unwrap()
            .iter()
            .map(|t| t.height)
            .collect();
        assert_eq!(heights, vec![-1, 9, 5]);

        let second = storage.list(id, Page { limit: 1, offset: 1 }).unwrap();
        assert_eq!(second[0].height, 9);
    }
}
