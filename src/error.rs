//! Error types for the loyalty ledger.

use thiserror::Error;

/// Result type alias for ledger operations
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors that can occur during ledger and reconciliation operations.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Identity, account or transaction absent
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    /// Duplicate creation (email, account for an identity, conflicting handle)
    #[error("{entity} already exists: {key}")]
    AlreadyExists { entity: &'static str, key: String },

    /// Unrecognized transaction kind
    #[error("Invalid transaction kind '{0}', expected EARN or REDEEM")]
    InvalidKind(String),

    /// Point quantity was zero or negative
    #[error("Invalid points {0}: must be greater than zero")]
    InvalidPoints(i64),

    /// Redemption exceeds the current balance
    #[error("Insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: u64, available: u64 },

    /// External provider call failed or timed out
    #[error("Loyalty provider unavailable during {operation}: {reason}")]
    ProviderUnavailable {
        operation: &'static str,
        reason: String,
    },

    /// Identifier text could not be parsed
    #[error("Invalid {entity} id '{value}'")]
    InvalidId { entity: &'static str, value: String },

    /// Cached balance disagrees with the transaction log
    #[error("Invariant violation on account {account}: {message}")]
    InvariantViolation { account: u64, message: String },

    /// Invalid replay record
    #[error("Invalid record at row {row}: {message}")]
    InvalidRecord { row: usize, message: String },

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),

    /// Failed to open or read the input file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV parsing error
    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    /// Missing input file argument
    #[error("Missing input file argument. Usage: loyalty-ledger <operations.csv>")]
    MissingArgument,
}

impl LedgerError {
    pub(crate) fn not_found(entity: &'static str, key: impl ToString) -> Self {
        LedgerError::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub(crate) fn already_exists(entity: &'static str, key: impl ToString) -> Self {
        LedgerError::AlreadyExists {
            entity,
            key: key.to_string(),
        }
    }
}
