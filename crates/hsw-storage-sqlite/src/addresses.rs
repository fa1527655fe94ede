//! Derived addresses per account and branch

use crate::models::{branch_col, AddressRow};
use crate::retry::with_busy_retry;
use crate::Result;
use hsw_core::{AddressPath, Branch};
use rusqlite::{params, Connection, OptionalExtension};

/// Address storage operations
pub struct AddressStorage<'a> {
    conn: &'a Connection,
}

impl<'a> AddressStorage<'a> {
    /// Create new address storage
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Record a derived address. Re-inserting the same path is a no-op.
    pub fn insert(&self, account_id: i64, path: AddressPath, address: &str) -> Result<()> {
        with_busy_retry(|| {
            self.conn.execute(
                "INSERT OR IGNORE INTO addresses (account_id, branch, idx, address) VALUES (?1, ?2, ?3, ?4)",
                params![account_id, path.branch.index(), path.index, address],
            )?;
            Ok(())
        })
    }

    /// Derivation path of an owned address
    pub fn path_of(&self, account_id: i64, address: &str) -> Result<Option<AddressPath>> {
        with_busy_retry(|| {
            Ok(self
                .conn
                .query_row(
                    "SELECT branch, idx FROM addresses WHERE account_id = ?1 AND address = ?2",
                    params![account_id, address],
                    |row| Ok(AddressPath::new(branch_col(row, 0)?, row.get(1)?)),
                )
                .optional()?)
        })
    }

    /// Address at a path
    pub fn get(&self, account_id: i64, path: AddressPath) -> Result<Option<String>> {
        with_busy_retry(|| {
            Ok(self
                .conn
                .query_row(
                    "SELECT address FROM addresses WHERE account_id = ?1 AND branch = ?2 AND idx = ?3",
                    params![account_id, path.branch.index(), path.index],
                    |row| row.get(0),
                )
                .optional()?)
        })
    }

    /// Number of stored addresses on a branch
    pub fn count(&self, account_id: i64, branch: Branch) -> Result<u32> {
        with_busy_retry(|| {
            Ok(self.conn.query_row(
                "SELECT COUNT(*) FROM addresses WHERE account_id = ?1 AND branch = ?2",
                params![account_id, branch.index()],
                |row| row.get(0),
            )?)
        })
    }

    /// Addresses on a branch in index order, up to `below`
    pub fn list(&self, account_id: i64, branch: Branch, below: u32) -> Result<Vec<AddressRow>> {
        with_busy_retry(|| {
            let mut stmt = self.conn.prepare(
                r#"
                SELECT account_id, branch, idx, address FROM addresses
                WHERE account_id = ?1 AND branch = ?2 AND idx < ?3
                ORDER BY idx
                "#,
            )?;
            let rows = stmt
                .query_map(params![account_id, branch.index(), below], |row| {
                    Ok(AddressRow {
                        account_id: row.get(0)?,
                        branch: branch_col(row, 1)?,
                        index: row.get(2)?,
                        address: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
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
    fn test_insert_and_resolve() {
        let (db, id) = setup();
        let storage = AddressStorage::new(db.conn());
        let path = AddressPath::new(Branch::Change, 4);
        storage.insert(id, path, "rs1qchange4").unwrap();
        storage.insert(id, path, "rs1qchange4").unwrap();

        assert_eq!(storage.path_of(id, "rs1qchange4").unwrap(), Some(path));
        assert_eq!(storage.get(id, path).unwrap().as_deref(), Some("rs1qchange4"));
        assert_eq!(storage.count(id, Branch::Change).unwrap(), 1);
        assert_eq!(storage.count(id, Branch::Receive).unwrap(), 0);
        assert!(storage.path_of(id, "rs1qunknown").unwrap().is_none());
    }

    #[test]
    fn test_list_in_index_order() {
        let (db, id) = setup();
        let storage = AddressStorage::new(db.conn());
        for i in (0..5u32).rev() {
            storage
                .insert(id, AddressPath::new(Branch::Receive, i), &format!("addr{}", i))
                .unwrap();
        }
        let rows = storage.list(id, Branch::Receive, 3).unwrap();
        let indexes: Vec<u32> = rows.iter().map(|r| r.index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);
    }
}
