//! Authentication extractors.
//!
//! - `AuthUser` - end user, via a JWT signed by the identity provider
//! - `ServiceAuth` - feature backends, via `X-API-Key`
//! - `AdminAuth` - support tooling, via `X-Admin-Key`

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use astro_ledger_core::UserId;

use crate::crypto::constant_time_eq;
use crate::error::ApiError;
use crate::state::AppState;

/// How long fetched signing keys stay valid.
const JWKS_CACHE_DURATION: Duration = Duration::from_secs(3600);

/// Timeout for JWKS fetch requests.
const JWKS_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Bearer prefix accepted when test tokens are enabled.
const TEST_TOKEN_PREFIX: &str = "test-token:";

/// An authenticated end user.
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// The user ID.
    pub user_id: UserId,
    /// The raw subject claim.
    pub subject: String,
}

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    fn from_request_parts<'life0, 'life1, 'async_trait>(
        parts: &'life0 mut Parts,
        state: &'life1 Arc<AppState>,
    ) -> ::core::pin::Pin<
        Box<
            dyn ::core::future::Future<Output = Result<Self, Self::Rejection>>
                + ::core::marker::Send
                + 'async_trait,
        >,
    >
    where
        'life0: 'async_trait,
        'life1: 'async_trait,
        Self: 'async_trait,
    {
        Box::pin(async move {
            let token = parts
                .headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .ok_or(ApiError::Unauthorized)?;

            if state.config.allow_test_tokens {
                if let Some(subject) = token.strip_prefix(TEST_TOKEN_PREFIX) {
                    let user_id = subject
                        .parse::<UserId>()
                        .map_err(|_| ApiError::Unauthorized)?;
                    return Ok(AuthUser {
                        user_id,
                        subject: subject.to_string(),
                    });
                }
            }

            let claims = validate_jwt(token, state).await?;
            let user_id = claims.sub.parse::<UserId>().map_err(|e| {
                tracing::debug!(error = %e, "JWT subject is not a valid user ID");
                ApiError::Unauthorized
            })?;

            Ok(AuthUser {
                user_id,
                subject: claims.sub,
            })
        })
    }
}

/// A feature backend authenticated by API key.
#[derive(Debug, Clone)]
pub struct ServiceAuth {
    /// The calling service, from `X-Service-Name`.
    pub service_name: String,
}

impl FromRequestParts<Arc<AppState>> for ServiceAuth {
    type Rejection = ApiError;

    fn from_request_parts<'life0, 'life1, 'async_trait>(
        parts: &'life0 mut Parts,
        state: &'life1 Arc<AppState>,
    ) -> ::core::pin::Pin<
        Box<
            dyn ::core::future::Future<Output = Result<Self, Self::Rejection>>
                + ::core::marker::Send
                + 'async_trait,
        >,
    >
    where
        'life0: 'async_trait,
        'life1: 'async_trait,
        Self: 'async_trait,
    {
        Box::pin(async move {
            check_key(
                &parts.headers,
                "x-api-key",
                state.config.service_api_key.as_deref(),
            )?;

            Ok(ServiceAuth {
                service_name: header_or(&parts.headers, "x-service-name", "unknown"),
            })
        })
    }
}

/// An administrator authenticated by the admin API key.
#[derive(Debug, Clone)]
pub struct AdminAuth {
    /// Admin identifier recorded as the actor of adjustments.
    pub admin_id: String,
}

impl FromRequestParts<Arc<AppState>> for AdminAuth {
    type Rejection = ApiError;

    fn from_request_parts<'life0, 'life1, 'async_trait>(
        parts: &'life0 mut Parts,
        state: &'life1 Arc<AppState>,
    ) -> ::core::pin::Pin<
        Box<
            dyn ::core::future::Future<Output = Result<Self, Self::Rejection>>
                + ::core::marker::Send
                + 'async_trait,
        >,
    >
    where
        'life0: 'async_trait,
        'life1: 'async_trait,
        Self: 'async_trait,
    {
        Box::pin(async move {
            check_key(
                &parts.headers,
                "x-admin-key",
                state.config.admin_api_key.as_deref(),
            )?;

            let admin_id = header_or(&parts.headers, "x-admin-id", "admin");
            tracing::info!(admin_id = %admin_id, "Admin authenticated");

            Ok(AdminAuth { admin_id })
        })
    }
}

/// Compare a key header against the configured key. An unconfigured key
/// rejects every request.
fn check_key(headers: &HeaderMap, header: &str, expected: Option<&str>) -> Result<(), ApiError> {
    let provided = headers
        .get(header)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;
    let expected = expected.ok_or(ApiError::Unauthorized)?;

    if constant_time_eq(provided, expected) {
        Ok(())
    } else {
        Err(ApiError::Unauthorized)
    }
}

fn header_or(headers: &HeaderMap, header: &str, default: &str) -> String {
    headers
        .get(header)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or(default)
        .to_string()
}

/// JWT claims issued by the identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject (user ID).
    pub sub: String,
    /// Audience (string or array).
    #[serde(default)]
    pub aud: Option<serde_json::Value>,
    /// Issuer.
    pub iss: String,
    /// Expiration time.
    pub exp: i64,
    /// Issued at.
    #[serde(default)]
    pub iat: i64,
}

// ============================================================================
// JWKS
// ============================================================================

/// JSON Web Key Set.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwks {
    /// Keys.
    pub keys: Vec<Jwk>,
}

/// Single JSON Web Key.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    /// Key type (e.g., "RSA").
    pub kty: String,
    /// Key ID.
    pub kid: Option<String>,
    /// RSA modulus (base64url).
    pub n: Option<String>,
    /// RSA exponent (base64url).
    pub e: Option<String>,
}

struct CachedKeys {
    by_kid: HashMap<String, DecodingKey>,
    default_key: Option<DecodingKey>,
    fetched_at: Option<Instant>,
}

impl CachedKeys {
    fn is_fresh(&self) -> bool {
        self.fetched_at
            .is_some_and(|at| at.elapsed() < JWKS_CACHE_DURATION)
    }

    fn get(&self, kid: Option<&str>) -> Option<DecodingKey> {
        match kid {
            Some(kid) => self.by_kid.get(kid).cloned(),
            None => self.default_key.clone(),
        }
    }
}

/// Signing keys fetched from `{auth_base_url}/.well-known/jwks.json`.
pub struct JwksCache {
    client: reqwest::Client,
    keys: RwLock<CachedKeys>,
}

impl JwksCache {
    /// Create an empty cache; keys are fetched on first use.
    #[must_use]
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(JWKS_FETCH_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            keys: RwLock::new(CachedKeys {
                by_kid: HashMap::new(),
                default_key: None,
                fetched_at: None,
            }),
        }
    }

    /// Decoding key for `kid`, refreshing the set when stale or unknown.
    async fn decoding_key(
        &self,
        kid: Option<&str>,
        auth_base_url: &str,
    ) -> Result<DecodingKey, ApiError> {
        {
            let keys = self.keys.read().await;
            if keys.is_fresh() {
                if let Some(key) = keys.get(kid) {
                    return Ok(key);
                }
            }
        }

        let jwks = self.fetch(auth_base_url).await?;

        let mut keys = self.keys.write().await;
        keys.by_kid.clear();
        keys.default_key = None;
        keys.fetched_at = Some(Instant::now());

        for jwk in &jwks.keys {
            if let Some(decoding_key) = jwk_to_decoding_key(jwk) {
                if let Some(kid) = &jwk.kid {
                    keys.by_kid.insert(kid.clone(), decoding_key.clone());
                }
                if keys.default_key.is_none() {
                    keys.default_key = Some(decoding_key);
                }
            }
        }

        keys.get(kid).ok_or(ApiError::Unauthorized)
    }

    async fn fetch(&self, auth_base_url: &str) -> Result<Jwks, ApiError> {
        let jwks_url = format!("{auth_base_url}/.well-known/jwks.json");
        tracing::debug!(url = %jwks_url, "Fetching JWKS");

        let response = self.client.get(&jwks_url).send().await.map_err(|e| {
            tracing::error!(error = %e, url = %jwks_url, "Failed to fetch JWKS");
            ApiError::ExternalService("Failed to fetch authentication keys".into())
        })?;

        if !response.status().is_success() {
            tracing::error!(
                status = %response.status(),
                url = %jwks_url,
                "JWKS fetch returned non-success status"
            );
            return Err(ApiError::ExternalService(
                "Failed to fetch authentication keys".into(),
            ));
        }

        let jwks: Jwks = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to parse JWKS response");
            ApiError::ExternalService("Failed to parse authentication keys".into())
        })?;

        tracing::info!(keys_count = jwks.keys.len(), "JWKS fetched");
        Ok(jwks)
    }
}

impl Default for JwksCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate a JWT's signature, audience, issuer and expiry.
async fn validate_jwt(token: &str, state: &AppState) -> Result<JwtClaims, ApiError> {
    let header = decode_header(token).map_err(|e| {
        tracing::debug!(error = %e, "Failed to decode JWT header");
        ApiError::Unauthorized
    })?;

    let decoding_key = state
        .jwks
        .decoding_key(header.kid.as_deref(), &state.config.auth_base_url)
        .await?;

    let mut validation = Validation::new(Algorithm::RS256);
    validation.set_audience(&[&state.config.auth_audience]);
    validation.set_issuer(&[&state.config.auth_base_url]);

    let token_data = decode::<JwtClaims>(token, &decoding_key, &validation).map_err(|e| {
        tracing::debug!(error = %e, "JWT validation failed");
        ApiError::Unauthorized
    })?;

    Ok(token_data.claims)
}

/// Convert an RSA JWK to a `DecodingKey`. Other key types are skipped.
fn jwk_to_decoding_key(jwk: &Jwk) -> Option<DecodingKey> {
    if jwk.kty != "RSA" {
        tracing::debug!(kty = %jwk.kty, "Skipping non-RSA JWK");
        return None;
    }
    DecodingKey::from_rsa_components(jwk.n.as_ref()?, jwk.e.as_ref()?).ok()
}
