//! Error types for the wallet core
//!
//! Error taxonomy for decoding chain data, deriving keys, validating names
//! and funding transactions.

use std::fmt;

/// Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Wallet core errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Insufficient funds for transaction
    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    /// Invalid address format
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Invalid amount
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Amount overflow
    #[error("Amount overflow: {0}")]
    AmountOverflow(String),

    /// Fee calculation error
    #[error("Fee calculation error: {0}")]
    FeeCalculation(String),

    /// Malformed wire data
    #[error("Decode error: {0}")]
    Decode(String),

    /// Covenant does not match the expected shape
    #[error("Invalid covenant: {0}")]
    InvalidCovenant(String),

    /// Transaction building error
    #[error("Transaction build error: {0}")]
    TransactionBuild(String),

    /// Transaction signing error
    #[error("Transaction signing error: {0}")]
    TransactionSigning(String),

    /// Key derivation error
    #[error("Key derivation error: {0}")]
    KeyDerivation(String),

    /// Invalid mnemonic
    #[error("Invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    /// Keyring is locked
    #[error("Wallet is locked")]
    WalletLocked,

    /// Wrong passphrase or corrupted seed ciphertext
    #[error("Decryption failed: {0}")]
    Decryption(String),

    /// Name fails charset/length rules
    #[error("Invalid name: {0}")]
    InvalidName(String),

    /// Name is on the reserved blacklist
    #[error("Name is reserved: {0}")]
    ReservedName(String),

    /// Name has not rolled out yet
    #[error("Name not yet available: {0}")]
    NameNotRolledOut(String),
}

impl Error {
    /// Check if error is a user-facing error (vs internal error)
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Error::InsufficientFunds(_)
                | Error::InvalidAddress(_)
                | Error::InvalidAmount(_)
                | Error::InvalidMnemonic(_)
                | Error::WalletLocked
                | Error::Decryption(_)
                | Error::InvalidName(_)
                | Error::ReservedName(_)
                | Error::NameNotRolledOut(_)
        )
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Error::InsufficientFunds(_) => {
                "Not enough confirmed, spendable coins to cover the outputs and fee.".to_string()
            }
            Error::InvalidAddress(_) => "That is not a valid address for this network.".to_string(),
            Error::InvalidMnemonic(_) => "The BIP-39 phrase does not check out.".to_string(),
            Error::WalletLocked => "The wallet is locked. Unlock it with your passphrase first.".to_string(),
            Error::Decryption(_) => "The passphrase is incorrect.".to_string(),
            Error::InvalidName(_) => {
                "Names may only contain a-z, 0-9, '-' and '_' and be at most 63 characters.".to_string()
            }
            Error::ReservedName(name) => format!("The name '{}' is reserved.", name),
            Error::NameNotRolledOut(_) => {
                "This name is not yet available for auction. Please try again later.".to_string()
            }
            _ => self.to_string(),
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::InsufficientFunds(_)
            | Error::InvalidAmount(_)
            | Error::AmountOverflow(_)
            | Error::FeeCalculation(_) => ErrorCategory::Funds,
            Error::InvalidAddress(_)
            | Error::InvalidName(_)
            | Error::ReservedName(_)
            | Error::NameNotRolledOut(_) => ErrorCategory::Validation,
            Error::Decode(_) | Error::InvalidCovenant(_) => ErrorCategory::Codec,
            Error::TransactionBuild(_) | Error::TransactionSigning(_) => ErrorCategory::Transaction,
            Error::KeyDerivation(_)
            | Error::InvalidMnemonic(_)
            | Error::WalletLocked
            | Error::Decryption(_) => ErrorCategory::Keys,
        }
    }
}

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Amount and fee errors
    Funds,
    /// Address and name validation errors
    Validation,
    /// Wire decoding errors
    Codec,
    /// Transaction building errors
    Transaction,
    /// Key and lock errors
    Keys,
    /// Internal/system errors
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Funds => write!(f, "Funds"),
            ErrorCategory::Validation => write!(f, "Validation"),
            ErrorCategory::Codec => write!(f, "Codec"),
            ErrorCategory::Transaction => write!(f, "Transaction"),
            ErrorCategory::Keys => write!(f, "Keys"),
            ErrorCategory::Internal => write!(f, "Internal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_error_detection() {
        assert!(Error::InsufficientFunds("test".to_string()).is_user_error());
        assert!(Error::WalletLocked.is_user_error());
        assert!(Error::ReservedName("localhost".to_string()).is_user_error());
        assert!(!Error::Decode("test".to_string()).is_user_error());
    }

    #[test]
    fn test_user_messages() {
        let msg = Error::InsufficientFunds("details".to_string()).user_message();
        assert!(msg.contains("spendable coins"));

        let msg = Error::ReservedName("example".to_string()).user_message();
        assert!(msg.contains("'example' is reserved"));
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(
            Error::InsufficientFunds("test".to_string()).category(),
            ErrorCategory::Funds
        );
        assert_eq!(
            Error::InvalidName("test".to_string()).category(),
            ErrorCategory::Validation
        );
        assert_eq!(Error::Decode("eof".to_string()).category(), ErrorCategory::Codec);
        assert_eq!(Error::WalletLocked.category(), ErrorCategory::Keys);
    }

    #[test]
    fn test_category_display() {
        assert_eq!(ErrorCategory::Funds.to_string(), "Funds");
        assert_eq!(ErrorCategory::Codec.to_string(), "Codec");
    }
}
