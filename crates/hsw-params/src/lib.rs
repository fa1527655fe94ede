//! Handshake network parameters and constants
//!
//! This crate provides the network configuration value that every wallet
//! component receives at construction: address prefixes, BIP-44 coin type,
//! ports, coinbase maturity and the name-auction schedule.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod consensus;
pub mod network;

pub use consensus::{ConsensusParams, NameParams, COIN, MAX_MONEY};
pub use network::{Network, NetworkType};

/// Error types for parameter operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid network specified
    #[error("Invalid network: {0}")]
    InvalidNetwork(String),

    /// Invalid address prefix
    #[error("Unknown address prefix: {0}")]
    UnknownPrefix(String),
}

/// Result type for parameter operations
pub type Result<T> = std::result::Result<T, Error>;
