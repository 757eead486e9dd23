//! End-user entitlement snapshot.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use astro_ledger_core::EntitlementSnapshot;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Balances, subscription and policies for the calling user.
///
/// Clients cache this to render locks and remaining counts; the server
/// re-decides on every consume.
pub async fn my_entitlements(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<EntitlementSnapshot>, ApiError> {
    let snapshot = state.ledger.snapshot(&auth.user_id)?;
    Ok(Json(snapshot))
}
