//! Per-account rollback to a height

use crate::{AccountStorage, CoinStorage, Database, NameStorage, Result, TransactionStorage};

/// Counts of what a rollback touched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RollbackSummary {
    /// Coins deleted
    pub coins: usize,
    /// Name history entries deleted
    pub history: usize,
    /// Transactions returned to pending
    pub transactions: usize,
}

/// Undo every effect of blocks above `height` for one account, in a single
/// database transaction.
///
/// Transactions from those blocks go back to pending, so coins they spend
/// stay spent until the transaction is dropped or mined again.
pub fn rollback_account(db: &mut Database, account_id: i64, height: u32) -> Result<RollbackSummary> {
    let tx = db.transaction()?;

    let summary = RollbackSummary {
        coins: CoinStorage::new(&tx).delete_above(account_id, height)?,
        history: NameStorage::new(&tx).delete_history_above(account_id, height)?,
        transactions: TransactionStorage::new(&tx).unconfirm_above(account_id, height)?,
    };
    NameStorage::new(&tx).recompute_statuses(account_id)?;
    AccountStorage::new(&tx).set_rescan_height(account_id, height)?;
    AccountStorage::new(&tx).clear_pending_rollback(account_id, height)?;

    tx.commit()?;

    tracing::info!(
        "Rolled back account {} to height {}: coins={}, history={}, txs={}",
        account_id,
        height,
        summary.coins,
        summary.history,
        summary.transactions
    );
    Ok(summary)
}
