//! SQLite storage for the Handshake wallet node
//!
//! One database holds every account: derived addresses, owned coins,
//! transactions, name history and status, bid blinds, and the block
//! checkpoint window used by the monitor. Storage structs borrow a
//! `Connection`, so the same calls work inside a `rusqlite::Transaction`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod accounts;
pub mod addresses;
pub mod blinds;
pub mod checkpoints;
pub mod coins;
pub mod database;
pub mod error;
pub mod migrations;
pub mod models;
pub mod names;
pub mod retry;
pub mod rollback;
pub mod transactions;

pub use accounts::AccountStorage;
pub use addresses::AddressStorage;
pub use blinds::BlindStorage;
pub use checkpoints::CheckpointStorage;
pub use coins::CoinStorage;
pub use database::{Database, SharedDatabase};
pub use error::{Error, Result};
pub use models::*;
pub use names::NameStorage;
pub use retry::{with_busy_retry, MAX_BACKOFF_MS, MAX_BUSY_RETRIES, BASE_BACKOFF_MS};
pub use rollback::{rollback_account, RollbackSummary};
pub use transactions::TransactionStorage;
