//! Persisted block checkpoint window used for reorg detection

use crate::models::{hash_col, BlockCheckpoint};
use crate::retry::with_busy_retry;
use crate::{AccountStorage, Database, Result};
use rusqlite::params;

/// Checkpoint window storage
pub struct CheckpointStorage<'a> {
    db: &'a mut Database,
}

impl<'a> CheckpointStorage<'a> {
    /// Create new checkpoint storage
    pub fn new(db: &'a mut Database) -> Self {
        Self { db }
    }

    /// Stored window, highest first
    pub fn load_window(&self) -> Result<Vec<BlockCheckpoint>> {
        with_busy_retry(|| {
            let mut stmt = self
                .db
                .conn()
                .prepare("SELECT height, hash FROM block_checkpoints ORDER BY height DESC")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(BlockCheckpoint {
                        height: row.get(0)?,
                        hash: hash_col(row, 1)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Atomically replace the window. After a reorg, `common_tip` is
    /// recorded as every account's pending rollback in the same transaction,
    /// so the rollback survives a restart even if no account saw it yet.
    pub fn replace_window(&mut self, window: &[BlockCheckpoint], common_tip: Option<u32>) -> Result<()> {
        let tx = self.db.transaction()?;
        if let Some(height) = common_tip {
            AccountStorage::new(&tx).request_rollback(height)?;
        }
        tx.execute("DELETE FROM block_checkpoints", [])?;
        for cp in window {
            tx.execute(
                "INSERT INTO block_checkpoints (height, hash) VALUES (?1, ?2)",
                params![cp.height, cp.hash.0.as_slice()],
            )?;
        }
        tx.commit()?;
        tracing::trace!("Stored {} checkpoints", window.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NewAccount;
    use hsw_core::Hash;

    #[test]
    fn test_replace_and_load_descending() {
        let mut db = Database::open_in_memory().unwrap();
        let mut storage = CheckpointStorage::new(&mut db);
        assert!(storage.load_window().unwrap().is_empty());

        let window: Vec<BlockCheckpoint> = (1..=3u32)
            .map(|h| BlockCheckpoint {
                height: h,
                hash: Hash([h as u8; 32]),
            })
            .collect();
        storage.replace_window(&window, None).unwrap();
        let loaded = storage.load_window().unwrap();
        assert_eq!(loaded.iter().map(|c| c.height).collect::<Vec<_>>(), vec![3, 2, 1]);

        storage.replace_window(&window[..1], None).unwrap();
        assert_eq!(storage.load_window().unwrap().len(), 1);
    }

    #[test]
    fn test_reorged_window_requests_rollback() {
        let mut db = Database::open_in_memory().unwrap();
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

        let window = [BlockCheckpoint {
            height: 9,
            hash: Hash([9u8; 32]),
        }];
        CheckpointStorage::new(&mut db).replace_window(&window, Some(6)).unwrap();
        let row = AccountStorage::new(db.conn()).load(id).unwrap();
        assert_eq!(row.pending_rollback, Some(6));
    }
}
