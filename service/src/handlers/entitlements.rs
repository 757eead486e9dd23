//! Entitlement checks and feature consumption for feature backends.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use astro_ledger_core::{purchase_path, AccessVia, CreditType};

use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::handlers::parse_user_id;
use crate::ledger::Spend;
use crate::state::AppState;

/// Access check response.
#[derive(Debug, Serialize)]
pub struct AccessResponse {
    /// Whether the feature may be used.
    pub allowed: bool,
    /// How access was granted.
    pub via: Option<AccessVia>,
    /// Credit type the feature spends.
    pub credit_type: CreditType,
    /// Current balance of that credit type.
    pub remaining: i64,
    /// Credits one use costs.
    pub cost_per_use: i64,
    /// Purchase URL when denied.
    pub redirect_hint: Option<String>,
}

/// Consume request body.
#[derive(Debug, Default, Deserialize)]
pub struct ConsumeRequest {
    /// Caller-chosen ID; a repeat replays the first outcome.
    #[serde(default)]
    pub request_id: Option<String>,
}

/// Check whether a user may use a feature. Never spends.
pub async fn check_access(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Path((uid, feature_key)): Path<(String, String)>,
) -> Result<Json<AccessResponse>, ApiError> {
    let user_id = parse_user_id(&uid)?;
    let decision = state.ledger.check_access(&user_id, &feature_key)?;

    tracing::debug!(
        service = %auth.service_name,
        user_id = %user_id,
        feature_key = %feature_key,
        allowed = decision.allowed,
        "Entitlement checked"
    );

    Ok(Json(AccessResponse {
        allowed: decision.allowed,
        via: decision.via,
        credit_type: decision.credit_type,
        remaining: decision.remaining,
        cost_per_use: decision.cost_per_use,
        redirect_hint: decision
            .redirect_hint
            .as_deref()
            .map(|path| state.purchase_url(path)),
    }))
}

/// Spend one use of a feature.
///
/// Answers 402 with a purchase hint when the balance is short.
pub async fn consume(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Path((uid, feature_key)): Path<(String, String)>,
    body: Option<Json<ConsumeRequest>>,
) -> Result<Json<Spend>, ApiError> {
    let user_id = parse_user_id(&uid)?;
    let request = body.map(|Json(request)| request).unwrap_or_default();

    let spend = state
        .ledger
        .consume_feature(
            &user_id,
            &feature_key,
            &auth.service_name,
            request.request_id.as_deref(),
        )
        .map_err(|err| match ApiError::from(err) {
            err @ ApiError::InsufficientCredits { credit_type, .. } => {
                let hint = state.purchase_url(&purchase_path(&feature_key, credit_type));
                err.with_redirect_hint(hint)
            }
            other => other,
        })?;

    Ok(Json(spend))
}
