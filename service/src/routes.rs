//! Router configuration.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{admin, entitlements, health, me, webhooks};
use crate::state::AppState;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
///
/// ## Entitlements (service API key)
/// - `GET /v1/entitlements/:uid/:feature` - Check access
/// - `POST /v1/entitlements/:uid/:feature/consume` - Spend one use
///
/// ## End user (JWT)
/// - `GET /v1/me/entitlements` - Snapshot for client caching
///
/// ## Admin (admin API key)
/// - `GET /v1/admin/credits` - Paginated account listing
/// - `GET /v1/admin/credits/:uid` - Account detail
/// - `GET /v1/admin/credits/:uid/adjustments` - Audit history
/// - `POST /v1/admin/credits/:uid/grant` - Grant credits
/// - `POST /v1/admin/credits/:uid/revoke` - Revoke credits
/// - `POST /v1/admin/credits/:uid/reset` - Zero all balances
/// - `GET /v1/admin/subscriptions/summary` - Subscription counts
/// - `GET /v1/admin/payments/failures` - Failed payment events
///
/// ## Webhooks (HMAC signature)
/// - `POST /webhooks/payments` - Payment gateway events
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state.config.cors_origins);
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout = Duration::from_secs(state.config.request_timeout_seconds);

    let state = Arc::new(state);

    Router::new()
        .route("/health", get(health::health))
        // Entitlements
        .route(
            "/v1/entitlements/:uid/:feature",
            get(entitlements::check_access),
        )
        .route(
            "/v1/entitlements/:uid/:feature/consume",
            post(entitlements::consume),
        )
        .route("/v1/me/entitlements", get(me::my_entitlements))
        // Admin
        .route("/v1/admin/credits", get(admin::list_accounts))
        .route("/v1/admin/credits/:uid", get(admin::account_detail))
        .route(
            "/v1/admin/credits/:uid/adjustments",
            get(admin::list_adjustments),
        )
        .route("/v1/admin/credits/:uid/grant", post(admin::grant))
        .route("/v1/admin/credits/:uid/revoke", post(admin::revoke))
        .route("/v1/admin/credits/:uid/reset", post(admin::reset))
        .route(
            "/v1/admin/subscriptions/summary",
            get(admin::subscription_summary),
        )
        .route("/v1/admin/payments/failures", get(admin::payment_failures))
        // Webhooks
        .route("/webhooks/payments", post(webhooks::payment_webhook))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(RequestBodyLimitLayer::new(max_body_bytes))
                .layer(TimeoutLayer::new(request_timeout)),
        )
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
