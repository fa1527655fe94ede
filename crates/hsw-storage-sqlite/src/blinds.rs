//! Bid blinds, so a later REVEAL can recover the true value and nonce

use crate::models::{amount, hash_col, u64_col, BlindRow};
use crate::retry::with_busy_retry;
use crate::Result;
use hsw_core::Hash;
use rusqlite::{params, Connection, OptionalExtension};

/// Blind storage operations
pub struct BlindStorage<'a> {
    conn: &'a Connection,
}

impl<'a> BlindStorage<'a> {
    /// Create new blind storage
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Save a blind
    pub fn save(&self, account_id: i64, blind: &BlindRow) -> Result<()> {
        let value = amount(blind.value)?;
        with_busy_retry(|| {
            self.conn.execute(
                "INSERT OR REPLACE INTO blinds (account_id, blind, value, nonce) VALUES (?1, ?2, ?3, ?4)",
                params![
                    account_id,
                    blind.blind.0.as_slice(),
                    value,
                    blind.nonce.0.as_slice()
                ],
            )?;
            Ok(())
        })
    }

    /// Look up a blind
    pub fn get(&self, account_id: i64, blind: &Hash) -> Result<Option<BlindRow>> {
        with_busy_retry(|| {
            Ok(self
                .conn
                .query_row(
                    "SELECT blind, value, nonce FROM blinds WHERE account_id = ?1 AND blind = ?2",
                    params![account_id, blind.0.as_slice()],
                    |row| {
                        Ok(BlindRow {
                            blind: hash_col(row, 0)?,
                            value: u64_col(row, 1)?,
                            nonce: hash_col(row, 2)?,
                        })
                    },
                )
                .optional()?)
        })
    }

    /// Forget a blind (used to revert a failed bid)
    pub fn delete(&self, account_id: i64, blind: &Hash) -> Result<()> {
        with_busy_retry(|| {
            self.conn.execute(
                "DELETE FROM blinds WHERE account_id = ?1 AND blind = ?2",
                params![account_id, blind.0.as_slice()],
            )?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AccountStorage, Database, NewAccount};

    #[test]
    fn test_save_and_get() {
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
        let storage = BlindStorage::new(db.conn());
        let nonce = Hash([5u8; 32]);
        let row = BlindRow {
            blind: hsw_core::names::blind(1_000_000, &nonce),
            value: 1_000_000,
            nonce,
        };
        storage.save(id, &row).unwrap();
        assert_eq!(storage.get(id, &row.blind).unwrap(), Some(row));
        storage.delete(id, &row.blind).unwrap();
        assert!(storage.get(id, &row.blind).unwrap().is_none());
    }
}
