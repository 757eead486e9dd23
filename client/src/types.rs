//! Request and response types for the astro-ledger client.

use serde::{Deserialize, Serialize};

use astro_ledger_core::{AccessVia, CreditType};

/// Result of an access check.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AccessCheck {
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
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsumeRequest {
    /// Caller-chosen ID; a repeat replays the first outcome.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Outcome of a spend.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConsumeOutcome {
    /// How access was granted.
    pub via: AccessVia,
    /// Credit type the feature spends.
    pub credit_type: CreditType,
    /// Credits taken (0 under a subscription).
    pub consumed: i64,
    /// Balance after the spend.
    pub balance: i64,
    /// Whether the outcome was replayed from an earlier identical request.
    pub replayed: bool,
    /// Audit record ID, if credits moved.
    pub adjustment_id: Option<String>,
}

/// API error response.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    /// Error details.
    pub error: ApiErrorBody,
}

/// API error body.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    /// Error code.
    pub code: String,
    /// Error message.
    pub message: String,
    /// Additional details.
    pub details: Option<serde_json::Value>,
}

impl ApiErrorBody {
    pub(crate) fn detail_i64(&self, key: &str) -> Option<i64> {
        self.details.as_ref()?.get(key)?.as_i64()
    }

    pub(crate) fn detail_str(&self, key: &str) -> Option<String> {
        self.details
            .as_ref()?
            .get(key)?
            .as_str()
            .map(str::to_string)
    }
}
