//! Chain access for the Handshake wallet node
//!
//! Provides the node RPC client and the block monitor that turns the node's
//! chain into reorg-aware `(chain_tip, common_tip)` notifications.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::result_large_err)]

pub mod cancel;
pub mod client;
pub mod error;
pub mod monitor;
#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;

pub use cancel::CancelToken;
pub use client::{NameInfo, NodeClient, NodeInfo, RetryConfig, RpcClientConfig, RpcNodeClient};
pub use error::{Error, Result};
pub use monitor::{
    BlockMonitor, BlockNotification, MonitorConfig, MonitorCounters, MonitorCountersSnapshot,
    DEFAULT_CHECKPOINT_WINDOW, DEFAULT_FINALITY_DEPTH, DEFAULT_POLL_INTERVAL,
};
