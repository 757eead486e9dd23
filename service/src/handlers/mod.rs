//! API handlers.

pub mod admin;
pub mod entitlements;
pub mod health;
pub mod me;
pub mod webhooks;

use astro_ledger_core::UserId;

use crate::error::ApiError;

/// Parse a user ID path segment.
pub(crate) fn parse_user_id(raw: &str) -> Result<UserId, ApiError> {
    raw.parse()
        .map_err(|e| ApiError::BadRequest(format!("invalid user id {raw:?}: {e}")))
}
