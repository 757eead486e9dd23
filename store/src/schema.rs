//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Credit accounts, keyed by `user_id`.
    pub const ACCOUNTS: &str = "accounts";

    /// Adjustment records, keyed by `adjustment_id` (ULID).
    pub const ADJUSTMENTS: &str = "adjustments";

    /// Index: adjustments by user, keyed by `user_id || 0x00 || adjustment_id`.
    /// Value is empty (index only).
    pub const ADJUSTMENTS_BY_USER: &str = "adjustments_by_user";

    /// Subscription records, keyed by `user_id`.
    pub const SUBSCRIPTIONS: &str = "subscriptions";

    /// Processed payment markers, keyed by gateway `payment_id`.
    pub const PAYMENTS: &str = "payments";

    /// Payment failures feed, keyed by failure ID (ULID).
    pub const PAYMENT_FAILURES: &str = "payment_failures";

    /// Stored outcomes of idempotent mutations, keyed by
    /// `user_id || 0x00 || idempotency_key`.
    pub const APPLIED_MUTATIONS: &str = "applied_mutations";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::ACCOUNTS,
        cf::ADJUSTMENTS,
        cf::ADJUSTMENTS_BY_USER,
        cf::SUBSCRIPTIONS,
        cf::PAYMENTS,
        cf::PAYMENT_FAILURES,
        cf::APPLIED_MUTATIONS,
    ]
}
