//! Error types

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(String),

    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Stored bytes failed to decode
    #[error("Codec error: {0}")]
    Codec(#[from] hsw_core::Error),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

impl Error {
    /// True when the underlying SQLite error is SQLITE_BUSY
    pub fn is_busy(&self) -> bool {
        matches!(self, Error::Database(e) if crate::retry::is_busy_error(e))
    }
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;
