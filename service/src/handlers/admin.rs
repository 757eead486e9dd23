//! Admin handlers for support tooling.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use astro_ledger_core::{AppliedMutation, AdjustmentRecord, CreditType, PaymentFailure, UserId};

use crate::auth::AdminAuth;
use crate::error::ApiError;
use crate::handlers::parse_user_id;
use crate::ledger::{AccountDetail, AccountPage, SubscriptionSummary};
use crate::state::AppState;

/// Default page size for listings.
const DEFAULT_PAGE_SIZE: usize = 50;

/// Largest page a caller may request.
const MAX_PAGE_SIZE: usize = 200;

/// Adjustments shown in the account detail view.
const DETAIL_RECENT_ADJUSTMENTS: usize = 20;

/// Account listing query.
#[derive(Debug, Deserialize)]
pub struct ListAccountsQuery {
    /// User ID prefix filter.
    pub search: Option<String>,
    /// Last user ID of the previous page.
    pub cursor: Option<String>,
    /// Page size.
    pub limit: Option<usize>,
}

/// Offset pagination query.
#[derive(Debug, Deserialize)]
pub struct PageQuery {
    /// Page size.
    pub limit: Option<usize>,
    /// Entries to skip.
    #[serde(default)]
    pub offset: usize,
}

/// Grant or revoke request.
#[derive(Debug, Deserialize)]
pub struct AdjustRequest {
    /// Credit type name (legacy aliases accepted).
    pub credit_type: String,
    /// Positive amount.
    pub amount: i64,
}

fn page_size(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
}

/// List accounts, optionally filtered by user ID prefix.
pub async fn list_accounts(
    State(state): State<Arc<AppState>>,
    _auth: AdminAuth,
    Query(query): Query<ListAccountsQuery>,
) -> Result<Json<AccountPage>, ApiError> {
    let cursor = query
        .cursor
        .as_deref()
        .filter(|c| !c.is_empty())
        .map(parse_user_id)
        .transpose()?;
    let search = query.search.as_deref().filter(|s| !s.is_empty());

    let page = state
        .ledger
        .list_accounts(search, cursor.as_ref(), page_size(query.limit))?;
    Ok(Json(page))
}

/// Balances, subscription and recent adjustments for one user.
pub async fn account_detail(
    State(state): State<Arc<AppState>>,
    _auth: AdminAuth,
    Path(uid): Path<String>,
) -> Result<Json<AccountDetail>, ApiError> {
    let user_id = parse_user_id(&uid)?;
    let detail = state
        .ledger
        .account_detail(&user_id, DETAIL_RECENT_ADJUSTMENTS)?;
    Ok(Json(detail))
}

/// Adjustment history for one user, newest first.
pub async fn list_adjustments(
    State(state): State<Arc<AppState>>,
    _auth: AdminAuth,
    Path(uid): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Vec<AdjustmentRecord>>, ApiError> {
    let user_id = parse_user_id(&uid)?;
    let records = state
        .ledger
        .adjustments(&user_id, page_size(query.limit), query.offset)?;
    Ok(Json(records))
}

/// Grant credits.
pub async fn grant(
    State(state): State<Arc<AppState>>,
    auth: AdminAuth,
    Path(uid): Path<String>,
    Json(request): Json<AdjustRequest>,
) -> Result<Json<AppliedMutation>, ApiError> {
    let (user_id, credit_type) = adjust_target(&uid, &request)?;
    let applied = state
        .ledger
        .grant(&user_id, credit_type, request.amount, &auth.admin_id)?;
    Ok(Json(applied))
}

/// Revoke credits. Refuses to drive a balance negative.
pub async fn revoke(
    State(state): State<Arc<AppState>>,
    auth: AdminAuth,
    Path(uid): Path<String>,
    Json(request): Json<AdjustRequest>,
) -> Result<Json<AppliedMutation>, ApiError> {
    let (user_id, credit_type) = adjust_target(&uid, &request)?;
    let applied = state
        .ledger
        .revoke(&user_id, credit_type, request.amount, &auth.admin_id)?;
    Ok(Json(applied))
}

/// Zero every balance.
pub async fn reset(
    State(state): State<Arc<AppState>>,
    auth: AdminAuth,
    Path(uid): Path<String>,
) -> Result<Json<AppliedMutation>, ApiError> {
    let user_id = parse_user_id(&uid)?;
    let applied = state.ledger.reset_all(&user_id, &auth.admin_id)?;
    Ok(Json(applied))
}

/// Subscription counts by status.
pub async fn subscription_summary(
    State(state): State<Arc<AppState>>,
    _auth: AdminAuth,
) -> Result<Json<SubscriptionSummary>, ApiError> {
    Ok(Json(state.ledger.subscription_summary()?))
}

/// Payment events that could not be reconciled, newest first.
pub async fn payment_failures(
    State(state): State<Arc<AppState>>,
    _auth: AdminAuth,
    Query(query): Query<PageQuery>,
) -> Result<Json<Vec<PaymentFailure>>, ApiError> {
    let failures = state
        .ledger
        .payment_failures(page_size(query.limit), query.offset)?;
    Ok(Json(failures))
}

fn adjust_target(uid: &str, request: &AdjustRequest) -> Result<(UserId, CreditType), ApiError> {
    let user_id = parse_user_id(uid)?;
    let credit_type = request.credit_type.parse::<CreditType>()?;
    Ok((user_id, credit_type))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_clamped() {
        assert_eq!(page_size(None), DEFAULT_PAGE_SIZE);
        assert_eq!(page_size(Some(0)), 1);
        assert_eq!(page_size(Some(10_000)), MAX_PAGE_SIZE);
    }

    #[test]
    fn unknown_credit_type_is_bad_request() {
        let request = AdjustRequest {
            credit_type: "tarot".into(),
            amount: 1,
        };
        assert!(matches!(
            adjust_target("user-1", &request),
            Err(ApiError::BadRequest(_))
        ));
    }
}
