//! Payment gateway webhook.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;

use astro_ledger_core::PaymentEvent;

use crate::crypto::verify_signature;
use crate::error::ApiError;
use crate::reconcile::ReconcileResult;
use crate::state::AppState;

/// Header carrying the hex HMAC-SHA256 of the raw body.
const SIGNATURE_HEADER: &str = "x-payment-signature";

/// Webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// The event was verified and handled.
    pub received: bool,
    /// The payment had already been reconciled.
    pub duplicate: bool,
    /// What happened: credited, subscribed, cancelled, duplicate, ignored or failed.
    pub outcome: &'static str,
}

/// Handle a payment gateway event.
///
/// Unsigned or wrongly signed bodies are rejected. Once verified, the event
/// is always acknowledged; events that cannot be applied land in the admin
/// failures feed instead of being retried by the gateway.
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, ApiError> {
    let Some(secret) = state.config.payment_webhook_secret.as_deref() else {
        tracing::error!("Payment webhook received but no webhook secret is configured");
        return Err(ApiError::Unauthorized);
    };

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Payment webhook without signature");
            ApiError::Unauthorized
        })?;

    if !verify_signature(secret, &body, signature) {
        tracing::warn!("Invalid payment webhook signature");
        return Err(ApiError::Unauthorized);
    }

    let event: PaymentEvent = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid payment event: {e}")))?;

    tracing::info!(
        event_type = %event.event_type,
        payment_id = %event.payment_id,
        user_id = %event.uid,
        product_id = ?event.product_id,
        "Received payment webhook"
    );

    let result = state.reconciler.handle(&event).await;

    Ok(Json(WebhookResponse {
        received: true,
        duplicate: matches!(result, ReconcileResult::Duplicate),
        outcome: result.label(),
    }))
}
