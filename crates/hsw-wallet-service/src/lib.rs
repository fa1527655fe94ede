//! Handshake wallet node service
//!
//! Ties the node client, block monitor and storage together into accounts
//! that follow the chain and spend from it:
//!
//! - [`AddrManager`] keeps a gap-limit lookahead of derived addresses in a
//!   bloom filter so scans only decode blocks that can matter.
//! - [`Account`] rolls back on reorgs, rescans forward, and builds every
//!   payment and name-auction transaction.
//! - [`WalletService`] runs the monitor and one task per account.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::result_large_err)]

pub mod account;
pub mod addr_manager;
pub mod config;
pub mod error;
pub mod service;

pub use account::{Account, AccountKey, AccountState, CreateAccount};
pub use addr_manager::{AddrManager, BranchState};
pub use config::{AccountConfig, WalletConfig};
pub use error::{Error, Result};
pub use service::WalletService;
