//! Name status rows and append-only name history

use crate::models::{amount, hash_col, opt_hash_col, parse_col, u64_col, NameHistoryRow, NameRow, Page};
use crate::retry::with_busy_retry;
use crate::Result;
use hsw_core::{Hash, NameAction, NameStatus, Outpoint};
use rusqlite::{params, Connection, OptionalExtension, Row};

const HISTORY_COLUMNS: &str = "h.account_id, h.name_hash, h.name, h.action, h.tx_hash, h.out_index, \
     h.value, h.height, h.parent_hash, h.parent_index";

fn row_to_history(row: &Row<'_>) -> rusqlite::Result<NameHistoryRow> {
    let parent_hash = opt_hash_col(row, 8)?;
    let parent_index: Option<u32> = row.get(9)?;
    Ok(NameHistoryRow {
        account_id: row.get(0)?,
        name_hash: hash_col(row, 1)?,
        name: row.get(2)?,
        action: parse_col(row, 3)?,
        outpoint: Outpoint::new(hash_col(row, 4)?, row.get(5)?),
        value: u64_col(row, 6)?,
        height: row.get(7)?,
        parent: parent_hash.zip(parent_index).map(|(h, i)| Outpoint::new(h, i)),
    })
}

fn row_to_name(row: &Row<'_>) -> rusqlite::Result<NameRow> {
    Ok(NameRow {
        account_id: row.get(0)?,
        name_hash: hash_col(row, 1)?,
        name: row.get(2)?,
        status: parse_col(row, 3)?,
        updated_height: row.get(4)?,
    })
}

/// Name storage operations
pub struct NameStorage<'a> {
    conn: &'a Connection,
}

impl<'a> NameStorage<'a> {
    /// Create new name storage
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Append a history entry. The first writer for an outpoint wins; returns
    /// false when the entry already existed.
    pub fn insert_history(&self, entry: &NameHistoryRow) -> Result<bool> {
        let value = amount(entry.value)?;
        with_busy_retry(|| {
            let n = self.conn.execute(
                r#"
                INSERT OR IGNORE INTO name_history
                    (account_id, name_hash, name, action, tx_hash, out_index, value, height,
                     parent_hash, parent_index)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
                params![
                    entry.account_id,
                    entry.name_hash.0.as_slice(),
                    entry.name,
                    entry.action.as_str(),
                    entry.outpoint.hash.0.as_slice(),
                    entry.outpoint.index,
                    value,
                    entry.height,
                    entry.parent.map(|p| p.hash.0.to_vec()),
                    entry.parent.map(|p| p.index),
                ],
            )?;
            Ok(n > 0)
        })
    }

    /// History for one name (or every name), newest first
    pub fn history(&self, account_id: i64, name_hash: Option<&Hash>, page: Page) -> Result<Vec<NameHistoryRow>> {
        let filter = name_hash.map(|h| h.0.to_vec());
        with_busy_retry(|| {
            let mut stmt = self.conn.prepare(&format!(
                r#"
                SELECT {} FROM name_history h
                WHERE h.account_id = ?1 AND (?2 IS NULL OR h.name_hash = ?2)
                ORDER BY h.height DESC, h.rowid DESC
                LIMIT ?3 OFFSET ?4
                "#,
                HISTORY_COLUMNS
            ))?;
            let rows = stmt
                .query_map(
                    params![account_id, filter, page.limit, page.offset],
                    row_to_history,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Ensure a name row exists
    pub fn ensure_name(&self, account_id: i64, name_hash: &Hash, name: &str) -> Result<()> {
        with_busy_retry(|| {
            self.conn.execute(
                "INSERT OR IGNORE INTO names (account_id, name_hash, name) VALUES (?1, ?2, ?3)",
                params![account_id, name_hash.0.as_slice(), name],
            )?;
            Ok(())
        })
    }

    /// Set a name's status
    pub fn set_status(&self, account_id: i64, name_hash: &Hash, status: NameStatus, height: i64) -> Result<()> {
        with_busy_retry(|| {
            self.conn.execute(
                "UPDATE names SET status = ?3, updated_height = ?4 WHERE account_id = ?1 AND name_hash = ?2",
                params![account_id, name_hash.0.as_slice(), status.as_str(), height],
            )?;
            Ok(())
        })
    }

    /// Apply `action` to the stored status and persist the result
    pub fn apply_action(&self, account_id: i64, name_hash: &Hash, action: NameAction, height: i64) -> Result<NameStatus> {
        let current = self
            .get(account_id, name_hash)?
            .map(|n| n.status)
            .unwrap_or_default();
        let next = action.apply(current);
        if next != current {
            self.set_status(account_id, name_hash, next, height)?;
        }
        Ok(next)
    }

    /// Name row by hash
    pub fn get(&self, account_id: i64, name_hash: &Hash) -> Result<Option<NameRow>> {
        with_busy_retry(|| {
            Ok(self
                .conn
                .query_row(
                    "SELECT account_id, name_hash, name, status, updated_height FROM names \
                     WHERE account_id = ?1 AND name_hash = ?2",
                    params![account_id, name_hash.0.as_slice()],
                    row_to_name,
                )
                .optional()?)
        })
    }

    /// Names tracked by the account, alphabetical
    pub fn list(&self, account_id: i64, page: Page) -> Result<Vec<NameRow>> {
        with_busy_retry(|| {
            let mut stmt = self.conn.prepare(
                "SELECT account_id, name_hash, name, status, updated_height FROM names \
                 WHERE account_id = ?1 ORDER BY name LIMIT ?2 OFFSET ?3",
            )?;
            let rows = stmt
                .query_map(params![account_id, page.limit, page.offset], row_to_name)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Our entries of `action` for a name that no later entry points back at,
    /// and whose output is still unspent
    pub fn without_child(&self, account_id: i64, name_hash: &Hash, action: NameAction) -> Result<Vec<NameHistoryRow>> {
        with_busy_retry(|| {
            let mut stmt = self.conn.prepare(&format!(
                r#"
                SELECT {} FROM name_history h
                JOIN coins c
                  ON c.account_id = h.account_id AND c.tx_hash = h.tx_hash AND c.out_index = h.out_index
                WHERE h.account_id = ?1 AND h.name_hash = ?2 AND h.action = ?3
                  AND c.spent_by IS NULL
                  AND NOT EXISTS (
                      SELECT 1 FROM name_history k
                      WHERE k.account_id = h.account_id
                        AND k.parent_hash = h.tx_hash
                        AND k.parent_index = h.out_index
                  )
                ORDER BY h.height, h.rowid
                "#,
                HISTORY_COLUMNS
            ))?;
            let rows = stmt
                .query_map(
                    params![account_id, name_hash.0.as_slice(), action.as_str()],
                    row_to_history,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Bids that have not been revealed
    pub fn unrevealed_bids(&self, account_id: i64, name_hash: &Hash) -> Result<Vec<NameHistoryRow>> {
        self.without_child(account_id, name_hash, NameAction::Bid)
    }

    /// Reveals that have not been redeemed or registered
    pub fn unredeemed_reveals(&self, account_id: i64, name_hash: &Hash) -> Result<Vec<NameHistoryRow>> {
        self.without_child(account_id, name_hash, NameAction::Reveal)
    }

    /// Delete history above `height`
    pub fn delete_history_above(&self, account_id: i64, height: u32) -> Result<usize> {
        with_busy_retry(|| {
            Ok(self.conn.execute(
                "DELETE FROM name_history WHERE account_id = ?1 AND height > ?2",
                params![account_id, height],
            )?)
        })
    }

    /// Rebuild every name's status by replaying its remaining history
    pub fn recompute_statuses(&self, account_id: i64) -> Result<()> {
        let names: Vec<Hash> = with_busy_retry(|| {
            let mut stmt = self
                .conn
                .prepare("SELECT name_hash FROM names WHERE account_id = ?1")?;
            let rows = stmt
                .query_map([account_id], |row| hash_col(row, 0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        for name_hash in names {
            let (actions, last_height): (Vec<NameAction>, i64) = with_busy_retry(|| {
                let mut stmt = self.conn.prepare(
                    "SELECT action, height FROM name_history WHERE account_id = ?1 AND name_hash = ?2 \
                     ORDER BY height, rowid",
                )?;
                let rows = stmt
                    .query_map(params![account_id, name_hash.0.as_slice()], |row| {
                        Ok((parse_col::<NameAction>(row, 0)?, row.get::<_, i64>(1)?))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                let last = rows.last().map(|(_, h)| *h).unwrap_or(0);
                Ok((rows.into_iter().map(|(a, _)| a).collect(), last))
            })?;
            let status = NameStatus::replay(&actions);
            self.set_status(account_id, &name_hash, status, last_height)?;
        }
        Ok(())
    }
}
