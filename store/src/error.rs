//! Error types for astro-ledger storage.

use astro_ledger_core::LedgerError;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The mutation was rejected by a ledger rule. Nothing was written.
    #[error(transparent)]
    Rejected(#[from] LedgerError),

    /// The transaction kept losing commit races and was abandoned.
    /// Nothing was written.
    #[error("transaction conflict after {attempts} attempts")]
    Conflict {
        /// Commit attempts made.
        attempts: u32,
    },

    /// The payment was already reconciled.
    #[error("duplicate payment: {payment_id}")]
    DuplicatePayment {
        /// The payment ID that was duplicated.
        payment_id: String,
    },
}

impl StoreError {
    /// Whether retrying the same operation may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::Database(_))
    }
}

impl From<rocksdb::Error> for StoreError {
    fn from(err: rocksdb::Error) -> Self {
        Self::Database(err.to_string())
    }
}
