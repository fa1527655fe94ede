//! Error types for node access and block monitoring

/// Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The chain no longer agrees with our checkpoints beyond what a reorg
    /// can explain. The monitor stops.
    #[error("Safety stop: {0}")]
    SafetyStop(String),

    /// The node answered with a JSON-RPC error object
    #[error("RPC error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code
        code: i64,
        /// Error message
        message: String,
    },

    /// Transport failure or timeout
    #[error("Network error: {0}")]
    Network(String),

    /// Response had an unexpected shape
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Raw chain data failed to decode
    #[error("Codec error: {0}")]
    Codec(#[from] hsw_core::Error),

    /// Operation cancelled
    #[error("Cancelled")]
    Cancelled,

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),
}

impl Error {
    /// Worth retrying on the next attempt or tick
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Network(_))
    }

    /// Fatal for the monitor
    pub fn is_safety_stop(&self) -> bool {
        matches!(self, Error::SafetyStop(_))
    }
}

impl From<hsw_storage_sqlite::Error> for Error {
    fn from(e: hsw_storage_sqlite::Error) -> Self {
        Error::Storage(format!("{}", e))
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Error::InvalidResponse(e.to_string())
        } else {
            Error::Network(e.to_string())
        }
    }
}
