//! Key encoding utilities for `RocksDB`.
//!
//! User IDs never contain `0x00`, so `user_id || 0x00` is an unambiguous
//! prefix: `abc` and `abcd` never share a range.

use astro_ledger_core::{AdjustmentId, UserId};

const SEPARATOR: u8 = 0x00;
const ULID_LEN: usize = 16;

/// Create an account key from a user ID.
#[must_use]
pub fn account_key(user_id: &UserId) -> Vec<u8> {
    user_id.as_bytes().to_vec()
}

/// Create a subscription key from a user ID.
#[must_use]
pub fn subscription_key(user_id: &UserId) -> Vec<u8> {
    user_id.as_bytes().to_vec()
}

/// Create an adjustment key from an adjustment ID.
#[must_use]
pub fn adjustment_key(id: &AdjustmentId) -> Vec<u8> {
    id.to_bytes().to_vec()
}

/// Create a prefix for iterating all adjustments for a user.
#[must_use]
pub fn user_adjustments_prefix(user_id: &UserId) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(user_id.as_bytes().len() + 1);
    prefix.extend_from_slice(user_id.as_bytes());
    prefix.push(SEPARATOR);
    prefix
}

/// Create a user-adjustment index key.
///
/// Format: `user_id || 0x00 || adjustment_id (16 bytes)`
///
/// Since ULIDs are time-ordered, adjustments for a user sort by time.
#[must_use]
pub fn user_adjustment_key(user_id: &UserId, id: &AdjustmentId) -> Vec<u8> {
    let mut key = user_adjustments_prefix(user_id);
    key.extend_from_slice(&id.to_bytes());
    key
}

/// Upper bound of a user's adjustment range, for reverse iteration.
#[must_use]
pub fn user_adjustments_upper_bound(user_id: &UserId) -> Vec<u8> {
    let mut key = user_adjustments_prefix(user_id);
    key.extend_from_slice(&[0xFF; ULID_LEN]);
    key
}

/// Extract the adjustment ID from a user-adjustment index key.
///
/// Returns `None` if the key is too short to hold a ULID.
#[must_use]
pub fn extract_adjustment_id(key: &[u8]) -> Option<AdjustmentId> {
    let start = key.len().checked_sub(ULID_LEN)?;
    let bytes: [u8; ULID_LEN] = key[start..].try_into().ok()?;
    Some(AdjustmentId::from_bytes(bytes))
}

/// Create a processed-payment key from a gateway payment ID.
#[must_use]
pub fn payment_key(payment_id: &str) -> Vec<u8> {
    payment_id.as_bytes().to_vec()
}

/// Create a payment failure key.
#[must_use]
pub fn payment_failure_key(id: &AdjustmentId) -> Vec<u8> {
    id.to_bytes().to_vec()
}

/// Create an applied-mutation key.
///
/// Idempotency keys are scoped per user so two users can never collide.
#[must_use]
pub fn applied_mutation_key(user_id: &UserId, idempotency_key: &str) -> Vec<u8> {
    let mut key = user_adjustments_prefix(user_id);
    key.extend_from_slice(idempotency_key.as_bytes());
    key
}
