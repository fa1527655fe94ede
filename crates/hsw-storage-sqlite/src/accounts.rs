//! Account rows: keys, address-branch state, rescan cursor and bloom filters

use crate::models::{AccountRow, NewAccount};
use crate::retry::with_busy_retry;
use crate::{Error, Result};
use hsw_core::Branch;
use rusqlite::{params, Connection, OptionalExtension, Row};

const ACCOUNT_COLUMNS: &str = "id, name, network, account_index, xpub, sealed_seed, \
     receive_depth, change_depth, receive_tip, change_tip, lookahead, rescan_height, \
     address_bloom, outpoint_bloom, created_at, pending_rollback";

/// Account storage operations
///
/// Works on a plain connection or inside a `rusqlite::Transaction`.
pub struct AccountStorage<'a> {
    conn: &'a Connection,
}

fn row_to_account(row: &Row<'_>) -> rusqlite::Result<AccountRow> {
    Ok(AccountRow {
        id: row.get(0)?,
        name: row.get(1)?,
        network: row.get(2)?,
        account_index: row.get(3)?,
        xpub: row.get(4)?,
        sealed_seed: row.get(5)?,
        receive_depth: row.get(6)?,
        change_depth: row.get(7)?,
        receive_tip: row.get(8)?,
        change_tip: row.get(9)?,
        lookahead: row.get(10)?,
        rescan_height: row.get(11)?,
        address_bloom: row.get(12)?,
        outpoint_bloom: row.get(13)?,
        created_at: row.get(14)?,
        pending_rollback: row.get(15)?,
    })
}

impl<'a> AccountStorage<'a> {
    /// Create new account storage
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Insert a new account and return its id
    pub fn create(&self, account: &NewAccount) -> Result<i64> {
        if account.name.trim().is_empty() {
            return Err(Error::Validation("account name cannot be empty".to_string()));
        }
        let created_at = chrono::Utc::now().timestamp();
        with_busy_retry(|| {
            self.conn.execute(
                r#"
                INSERT INTO accounts
                    (name, network, account_index, xpub, sealed_seed, lookahead, rescan_height, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
                params![
                    account.name,
                    account.network,
                    account.account_index,
                    account.xpub,
                    account.sealed_seed,
                    account.lookahead,
                    account.rescan_height,
                    created_at
                ],
            )?;
            Ok(self.conn.last_insert_rowid())
        })
    }

    /// Load by id
    pub fn load(&self, id: i64) -> Result<AccountRow> {
        with_busy_retry(|| {
            Ok(self
                .conn
                .query_row(
                    &format!("SELECT {} FROM accounts WHERE id = ?1", ACCOUNT_COLUMNS),
                    [id],
                    row_to_account,
                )
                .optional()?)
        })?
        .ok_or_else(|| Error::NotFound(format!("account {}", id)))
    }

    /// Load by name
    pub fn load_by_name(&self, name: &str) -> Result<Option<AccountRow>> {
        with_busy_retry(|| {
            Ok(self
                .conn
                .query_row(
                    &format!("SELECT {} FROM accounts WHERE name = ?1", ACCOUNT_COLUMNS),
                    [name],
                    row_to_account,
                )
                .optional()?)
        })
    }

    /// All accounts, oldest first
    pub fn list(&self) -> Result<Vec<AccountRow>> {
        with_busy_retry(|| {
            let mut stmt = self
                .conn
                .prepare(&format!("SELECT {} FROM accounts ORDER BY id", ACCOUNT_COLUMNS))?;
            let rows = stmt
                .query_map([], row_to_account)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Move the rescan cursor
    pub fn set_rescan_height(&self, id: i64, height: u32) -> Result<()> {
        self.update(id, "UPDATE accounts SET rescan_height = ?2 WHERE id = ?1", height)
    }

    /// Record that every account must roll back to at most `height` before
    /// scanning again. A lower pending target is kept.
    pub fn request_rollback(&self, height: u32) -> Result<usize> {
        with_busy_retry(|| {
            Ok(self.conn.execute(
                "UPDATE accounts SET pending_rollback = MIN(COALESCE(pending_rollback, ?1), ?1)",
                [height],
            )?)
        })
    }

    /// Clear a pending rollback satisfied by rolling back to `height`
    pub fn clear_pending_rollback(&self, id: i64, height: u32) -> Result<()> {
        with_busy_retry(|| {
            self.conn.execute(
                "UPDATE accounts SET pending_rollback = NULL WHERE id = ?1 AND pending_rollback >= ?2",
                params![id, height],
            )?;
            Ok(())
        })
    }

    /// Persist a branch's depth and lookahead tip
    pub fn set_branch_state(&self, id: i64, branch: Branch, depth: u32, tip: u32) -> Result<()> {
        let sql = match branch {
            Branch::Receive => "UPDATE accounts SET receive_depth = ?2, receive_tip = ?3 WHERE id = ?1",
            Branch::Change => "UPDATE accounts SET change_depth = ?2, change_tip = ?3 WHERE id = ?1",
        };
        with_busy_retry(|| {
            let n = self.conn.execute(sql, params![id, depth, tip])?;
            expect_one(n, id)
        })
    }

    /// Persist the serialized address bloom filter
    pub fn set_address_bloom(&self, id: i64, bytes: &[u8]) -> Result<()> {
        self.update(id, "UPDATE accounts SET address_bloom = ?2 WHERE id = ?1", bytes)
    }

    /// Persist the serialized outpoint bloom filter
    pub fn set_outpoint_bloom(&self, id: i64, bytes: &[u8]) -> Result<()> {
        self.update(id, "UPDATE accounts SET outpoint_bloom = ?2 WHERE id = ?1", bytes)
    }

    /// Replace the sealed seed after a passphrase change
    pub fn set_sealed_seed(&self, id: i64, sealed: &[u8]) -> Result<()> {
        self.update(id, "UPDATE accounts SET sealed_seed = ?2 WHERE id = ?1", sealed)
    }

    fn update<T: rusqlite::ToSql>(&self, id: i64, sql: &str, value: T) -> Result<()> {
        with_busy_retry(|| {
            let n = self.conn.execute(sql, params![id, value])?;
            expect_one(n, id)
        })
    }
}

fn expect_one(changed: usize, id: i64) -> Result<()> {
    if changed == 0 {
        return Err(Error::NotFound(format!("account {}", id)));
    }
    Ok(())
}
