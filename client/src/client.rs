//! Astro Ledger HTTP client implementation.

use reqwest::{Client, StatusCode};
use std::time::Duration;

use astro_ledger_core::EntitlementSnapshot;

use crate::error::ClientError;
use crate::types::{AccessCheck, ApiErrorResponse, ConsumeOutcome, ConsumeRequest};

/// Astro Ledger API client.
///
/// Service-key methods are for feature backends; [`Self::my_entitlements`]
/// takes the end user's JWT instead.
#[derive(Debug, Clone)]
pub struct AstroLedgerClient {
    client: Client,
    base_url: String,
    api_key: String,
    service_name: String,
}

impl AstroLedgerClient {
    /// Create a new client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Base URL of the service (e.g., `"http://astro-ledger:8080"`)
    /// * `api_key` - Service API key for authentication
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Http` if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, ClientError> {
        Self::with_options(base_url, api_key, ClientOptions::default())
    }

    /// Create a new client with custom options.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Http` if the HTTP client cannot be built.
    pub fn with_options(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        options: ClientOptions,
    ) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(options.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            service_name: options.service_name,
        })
    }

    /// Ask whether a user may use a feature. Never spends.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::PolicyNotFound` for an unregistered feature, or
    /// a transport or API error.
    pub async fn check_access(
        &self,
        user_id: &str,
        feature_key: &str,
    ) -> Result<AccessCheck, ClientError> {
        let url = format!("{}/v1/entitlements/{user_id}/{feature_key}", self.base_url);

        let response = self
            .client
            .get(&url)
            .header("x-api-key", &self.api_key)
            .header("x-service-name", &self.service_name)
            .send()
            .await?;

        handle_response(response).await
    }

    /// Spend one use of a feature.
    ///
    /// Pass a `request_id` to make retries safe: the server replays the
    /// first outcome instead of spending again.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::InsufficientCredits` (with a purchase hint) when
    /// the balance is short, or a transport or API error.
    pub async fn consume(
        &self,
        user_id: &str,
        feature_key: &str,
        request_id: Option<&str>,
    ) -> Result<ConsumeOutcome, ClientError> {
        let url = format!(
            "{}/v1/entitlements/{user_id}/{feature_key}/consume",
            self.base_url
        );
        let request = ConsumeRequest {
            request_id: request_id.map(str::to_string),
        };

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("x-service-name", &self.service_name)
            .json(&request)
            .send()
            .await?;

        let outcome: ConsumeOutcome = handle_response(response).await?;
        tracing::debug!(
            user_id = %user_id,
            feature_key = %feature_key,
            balance = outcome.balance,
            replayed = outcome.replayed,
            "Feature use spent"
        );
        Ok(outcome)
    }

    /// Fetch the calling user's entitlement snapshot (requires user JWT).
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Unauthorized` for a rejected token, or a
    /// transport or API error.
    pub async fn my_entitlements(&self, user_jwt: &str) -> Result<EntitlementSnapshot, ClientError> {
        let url = format!("{}/v1/me/entitlements", self.base_url);

        let response = self
            .client
            .get(&url)
            .header("authorization", format!("Bearer {user_jwt}"))
            .send()
            .await?;

        handle_response(response).await
    }
}

/// Decode a success body or map the error envelope to a typed error.
async fn handle_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, ClientError> {
    let status = response.status();

    if status.is_success() {
        return Ok(response.json().await?);
    }

    let Ok(api_error) = response.json::<ApiErrorResponse>().await else {
        return Err(match status {
            StatusCode::UNAUTHORIZED => ClientError::Unauthorized,
            StatusCode::SERVICE_UNAVAILABLE => ClientError::Unavailable,
            _ => ClientError::Api {
                code: "unknown".to_string(),
                message: format!("HTTP {status}"),
                status: status.as_u16(),
            },
        });
    };

    let error = api_error.error;
    Err(match error.code.as_str() {
        "insufficient_credits" => ClientError::InsufficientCredits {
            credit_type: error.detail_str("credit_type"),
            balance: error.detail_i64("balance").unwrap_or(0),
            required: error.detail_i64("required").unwrap_or(0),
            redirect_hint: error.detail_str("redirect_hint"),
        },
        "policy_not_found" => ClientError::PolicyNotFound {
            feature_key: error.detail_str("feature_key").unwrap_or(error.message),
        },
        "not_found" => ClientError::AccountNotFound {
            message: error.message,
        },
        "unauthorized" => ClientError::Unauthorized,
        "unavailable" => ClientError::Unavailable,
        _ => ClientError::Api {
            code: error.code,
            message: error.message,
            status: status.as_u16(),
        },
    })
}

/// Client options for customization.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Request timeout in seconds (default: 30).
    pub timeout_seconds: u64,
    /// Service name sent as `X-Service-Name` and recorded as the spend actor.
    pub service_name: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            service_name: "unknown".to_string(),
        }
    }
}

impl ClientOptions {
    /// Create options with a service name.
    #[must_use]
    pub fn with_service_name(name: impl Into<String>) -> Self {
        Self {
            service_name: name.into(),
            ..Self::default()
        }
    }
}
