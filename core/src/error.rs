//! Error types for astro-ledger.

use crate::ids::IdError;
use crate::CreditType;

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors that can occur in ledger operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    /// No policy is registered for the feature key.
    #[error("no access policy registered for feature: {feature_key}")]
    PolicyNotFound {
        /// The unregistered feature key.
        feature_key: String,
    },

    /// The user has no credit account.
    #[error("account not found: {user_id}")]
    UserNotFound {
        /// The user ID that was not found.
        user_id: String,
    },

    /// Insufficient credits for the operation.
    #[error("insufficient {credit_type} credits: balance={balance}, required={required}")]
    InsufficientCredits {
        /// Credit type that was short.
        credit_type: CreditType,
        /// Current balance.
        balance: i64,
        /// Required amount.
        required: i64,
    },

    /// A revoke would drive the balance below zero.
    #[error("revoke would underflow {credit_type}: balance={balance}, requested={requested}")]
    RevokeWouldUnderflow {
        /// Credit type targeted by the revoke.
        credit_type: CreditType,
        /// Current balance.
        balance: i64,
        /// Amount the admin asked to remove.
        requested: i64,
    },

    /// An idempotency key was reused for a different mutation.
    #[error("idempotency key {key} was already used for a different request")]
    IdempotencyKeyReused {
        /// The reused key.
        key: String,
    },

    /// The payment product is not in the catalog.
    #[error("unknown product: {product_id}")]
    UnknownProduct {
        /// The unrecognised product ID.
        product_id: String,
    },

    /// Unknown credit type name.
    #[error("unknown credit type: {0}")]
    UnknownCreditType(String),

    /// Invalid amount.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Invalid policy or catalog definition.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),
}
