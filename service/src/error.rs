//! API error types and responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use astro_ledger_core::{CreditType, LedgerError};
use astro_ledger_store::StoreError;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unauthorized - missing or invalid credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// The feature has no access policy.
    #[error("no access policy registered for feature: {0}")]
    PolicyNotFound(String),

    /// Bad request - invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Conflict - the request contradicts current state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Insufficient credits.
    #[error("insufficient {credit_type} credits: balance={balance}, required={required}")]
    InsufficientCredits {
        /// Credit type that was short.
        credit_type: CreditType,
        /// Current balance.
        balance: i64,
        /// Required amount.
        required: i64,
        /// Where to buy more.
        redirect_hint: Option<String>,
    },

    /// The store could not commit in time; the request may be retried.
    #[error("temporarily unavailable: {0}")]
    Unavailable(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// External service error.
    #[error("external service error: {0}")]
    ExternalService(String),
}

impl ApiError {
    /// Attach a purchase redirect to an insufficient-credits error.
    #[must_use]
    pub fn with_redirect_hint(self, hint: String) -> Self {
        match self {
            Self::InsufficientCredits {
                credit_type,
                balance,
                required,
                ..
            } => Self::InsufficientCredits {
                credit_type,
                balance,
                required,
                redirect_hint: Some(hint),
            },
            other => other,
        }
    }
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                self.to_string(),
                None,
            ),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone(), None),
            Self::PolicyNotFound(feature_key) => {
                tracing::error!(feature_key = %feature_key, "Request for feature without policy");
                (
                    StatusCode::NOT_FOUND,
                    "policy_not_found",
                    self.to_string(),
                    Some(serde_json::json!({ "feature_key": feature_key })),
                )
            }
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone(), None),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone(), None),
            Self::InsufficientCredits {
                credit_type,
                balance,
                required,
                redirect_hint,
            } => (
                StatusCode::PAYMENT_REQUIRED,
                "insufficient_credits",
                self.to_string(),
                Some(serde_json::json!({
                    "credit_type": credit_type,
                    "balance": balance,
                    "required": required,
                    "redirect_hint": redirect_hint,
                })),
            ),
            Self::Unavailable(msg) => {
                tracing::warn!(error = %msg, "Request abandoned after storage contention");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "unavailable",
                    "Service busy, retry the request".to_string(),
                    None,
                )
            }
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
            Self::ExternalService(msg) => (
                StatusCode::BAD_GATEWAY,
                "external_service_error",
                msg.clone(),
                None,
            ),
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::PolicyNotFound { feature_key } => Self::PolicyNotFound(feature_key),
            LedgerError::UserNotFound { user_id } => {
                Self::NotFound(format!("account not found: {user_id}"))
            }
            LedgerError::InsufficientCredits {
                credit_type,
                balance,
                required,
            } => Self::InsufficientCredits {
                credit_type,
                balance,
                required,
                redirect_hint: None,
            },
            err @ (LedgerError::RevokeWouldUnderflow { .. }
            | LedgerError::IdempotencyKeyReused { .. }) => Self::Conflict(err.to_string()),
            err @ (LedgerError::UnknownProduct { .. }
            | LedgerError::UnknownCreditType(_)
            | LedgerError::InvalidAmount(_)
            | LedgerError::InvalidId(_)) => Self::BadRequest(err.to_string()),
            LedgerError::Configuration(msg) => Self::Internal(msg),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Rejected(err) => err.into(),
            err @ StoreError::Conflict { .. } => Self::Unavailable(err.to_string()),
            err @ StoreError::DuplicatePayment { .. } => Self::Conflict(err.to_string()),
            StoreError::Database(msg) | StoreError::Serialization(msg) => Self::Internal(msg),
        }
    }
}
