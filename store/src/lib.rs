//! `RocksDB` storage layer for astro-ledger.
//!
//! This crate persists credit accounts, the adjustment audit log,
//! subscriptions and payment reconciliation state using `RocksDB` with
//! column families for indexing.
//!
//! # Architecture
//!
//! The storage uses the following column families:
//!
//! - `accounts`: Credit accounts, keyed by `user_id`
//! - `adjustments`: Adjustment records, keyed by `adjustment_id` (ULID)
//! - `adjustments_by_user`: Index for listing adjustments by user
//! - `subscriptions`: Subscription records, keyed by `user_id`
//! - `payments`: Processed-payment markers, keyed by `payment_id`
//! - `payment_failures`: Operator-facing failures feed
//! - `applied_mutations`: Outcomes of idempotent mutations
//!
//! Every balance change runs in an optimistic transaction: the account is
//! read with `get_for_update`, the mutation is validated in memory, and the
//! account, its audit records and any idempotency marker are committed
//! together. A lost commit race is retried from the read.
//!
//! # Example
//!
//! ```no_run
//! use astro_ledger_core::{AdjustmentReason, CreditType, LedgerMutation, MutationContext, UserId};
//! use astro_ledger_store::{RocksStore, Store};
//!
//! let store = RocksStore::open("/tmp/astro-ledger-db").unwrap();
//!
//! let user_id: UserId = "user-1".parse().unwrap();
//! let grant = LedgerMutation::Grant {
//!     credit_type: CreditType::Kundali,
//!     amount: 3,
//!     reason: AdjustmentReason::AdminGrant,
//! };
//! let applied = store
//!     .apply_mutation(&user_id, &grant, &MutationContext::actor("support-1"))
//!     .unwrap();
//! assert_eq!(applied.account.balance(CreditType::Kundali), 3);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod rocks;
pub mod schema;

pub use error::{Result, StoreError};
pub use rocks::{RocksStore, DEFAULT_MAX_COMMIT_ATTEMPTS};

use astro_ledger_core::{
    Account, AdjustmentId, AdjustmentRecord, AppliedMutation, LedgerMutation, MutationContext,
    PaymentEvent, PaymentFailure, ProcessedPayment, ProductGrant, SubscriptionRecord, UserId,
};

/// What a reconciled payment changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Credits were granted.
    Credited(AppliedMutation),

    /// A subscription was activated or extended.
    Subscribed(SubscriptionRecord),
}

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer so the service can hold it as
/// `Arc<dyn Store>`.
pub trait Store: Send + Sync {
    // =========================================================================
    // Account Operations
    // =========================================================================

    /// Get an account by user ID, normalized.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_account(&self, user_id: &UserId) -> Result<Option<Account>>;

    /// List accounts ordered by user ID.
    ///
    /// `search` restricts to user IDs starting with the given prefix; `after`
    /// is the last user ID of the previous page.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_accounts(
        &self,
        search: Option<&str>,
        after: Option<&UserId>,
        limit: usize,
    ) -> Result<Vec<Account>>;

    /// Apply a ledger mutation atomically.
    ///
    /// The account, its adjustment records and (when `ctx` carries an
    /// idempotency key) the stored outcome are committed in one transaction.
    /// A repeated idempotency key returns the stored outcome with
    /// `replayed = true` and writes nothing.
    ///
    /// # Errors
    ///
    /// - `StoreError::Rejected(LedgerError::UserNotFound)` if the account is
    ///   missing and the mutation does not create accounts.
    /// - `StoreError::Rejected(_)` for any other ledger rule violation.
    /// - `StoreError::Conflict` if every commit attempt lost a race.
    fn apply_mutation(
        &self,
        user_id: &UserId,
        mutation: &LedgerMutation,
        ctx: &MutationContext,
    ) -> Result<AppliedMutation>;

    /// Get the stored outcome of an idempotent mutation.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_applied(&self, user_id: &UserId, idempotency_key: &str)
        -> Result<Option<AppliedMutation>>;

    // =========================================================================
    // Adjustment Operations
    // =========================================================================

    /// Get an adjustment record by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_adjustment(&self, id: &AdjustmentId) -> Result<Option<AdjustmentRecord>>;

    /// List adjustments for a user, ordered by time (newest first).
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_adjustments_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AdjustmentRecord>>;

    // =========================================================================
    // Subscription Operations
    // =========================================================================

    /// Get a user's subscription record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_subscription(&self, user_id: &UserId) -> Result<Option<SubscriptionRecord>>;

    /// List subscription records ordered by user ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_subscriptions(
        &self,
        after: Option<&UserId>,
        limit: usize,
    ) -> Result<Vec<SubscriptionRecord>>;

    /// Deactivate a user's subscription.
    ///
    /// Returns the updated record, or `None` if the user had none.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn cancel_subscription(&self, user_id: &UserId) -> Result<Option<SubscriptionRecord>>;

    // =========================================================================
    // Payment Operations
    // =========================================================================

    /// Apply a payment's grant and record it as processed, atomically.
    ///
    /// # Errors
    ///
    /// - `StoreError::DuplicatePayment` if `payment_id` was already processed.
    /// - `StoreError::Conflict` if every commit attempt lost a race.
    fn reconcile_payment(
        &self,
        event: &PaymentEvent,
        grant: &ProductGrant,
    ) -> Result<ReconcileOutcome>;

    /// Get a processed-payment marker.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_payment(&self, payment_id: &str) -> Result<Option<ProcessedPayment>>;

    /// Append to the payment failures feed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_payment_failure(&self, failure: &PaymentFailure) -> Result<()>;

    /// List payment failures, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_payment_failures(&self, limit: usize, offset: usize) -> Result<Vec<PaymentFailure>>;
}
