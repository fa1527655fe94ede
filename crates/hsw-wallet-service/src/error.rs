//! Error types for accounts and the wallet service

use hsw_core::Hash;

/// Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Wallet service errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Codec, key or name-rule failure
    #[error(transparent)]
    Core(#[from] hsw_core::Error),

    /// Network parameter error
    #[error(transparent)]
    Params(#[from] hsw_params::Error),

    /// Storage failure
    #[error(transparent)]
    Storage(#[from] hsw_storage_sqlite::Error),

    /// Database transaction failure
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Node or monitor failure
    #[error(transparent)]
    Sync(#[from] hsw_sync::Error),

    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// No account with this name
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    /// An account with this name already exists
    #[error("Account already exists: {0}")]
    AccountExists(String),

    /// A request argument is out of range
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The account has no private keys
    #[error("Account is watch-only")]
    WatchOnly,

    /// The name is not in the auction phase the operation needs
    #[error("Invalid name state: {0}")]
    InvalidState(String),

    /// The node does not know the name
    #[error("Name not found: {0}")]
    NameNotFound(String),

    /// The account does not hold the name's owner output
    #[error("Name not owned: {0}")]
    NotOwner(String),

    /// A stored BID has no matching blind
    #[error("Missing blind for bid {0}")]
    MissingBlind(Hash),

    /// The broadcast transaction never showed up in the mempool
    #[error("Transaction {0} not seen in mempool")]
    BroadcastTimeout(Hash),

    /// Operation cancelled
    #[error("Cancelled")]
    Cancelled,

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Check if error is caused by user input rather than the wallet or node
    pub fn is_user_error(&self) -> bool {
        match self {
            Error::Core(e) => e.is_user_error(),
            Error::Config(_)
            | Error::AccountNotFound(_)
            | Error::AccountExists(_)
            | Error::InvalidArgument(_)
            | Error::WatchOnly
            | Error::InvalidState(_)
            | Error::NameNotFound(_)
            | Error::NotOwner(_) => true,
            _ => false,
        }
    }

    /// True when the underlying cause was a cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled | Error::Sync(hsw_sync::Error::Cancelled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_errors() {
        assert!(Error::InvalidState("BIDDING".into()).is_user_error());
        assert!(Error::Core(hsw_core::Error::WalletLocked).is_user_error());
        assert!(!Error::BroadcastTimeout(Hash::ZERO).is_user_error());
        assert!(!Error::Sync(hsw_sync::Error::Network("down".into())).is_user_error());
    }

    #[test]
    fn test_cancelled() {
        assert!(Error::Sync(hsw_sync::Error::Cancelled).is_cancelled());
        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::Config("x".into()).is_cancelled());
    }
}
