//! Service configuration.

use std::path::Path;

use serde::Deserialize;

use astro_ledger_core::{LedgerError, PolicyRegistry};
use astro_ledger_store::DEFAULT_MAX_COMMIT_ATTEMPTS;

use crate::reconcile::RetryConfig;

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// Path to `RocksDB` data directory (default: "/data/astro-ledger").
    pub data_dir: String,

    /// JWT issuer base URL; JWKS is fetched from `/.well-known/jwks.json`.
    pub auth_base_url: String,

    /// Expected JWT audience (default: "astro-ledger").
    pub auth_audience: String,

    /// Service API key for feature backends.
    pub service_api_key: Option<String>,

    /// Admin API key for support tooling.
    pub admin_api_key: Option<String>,

    /// Shared secret for payment webhook signatures.
    pub payment_webhook_secret: Option<String>,

    /// Frontend URL prefixed to purchase redirect hints.
    pub frontend_url: String,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,

    /// JSON file overriding the built-in feature policies.
    pub policy_file: Option<String>,

    /// Commit attempts before a contended ledger write gives up.
    pub max_commit_attempts: u32,

    /// Retry behaviour for payment reconciliation.
    pub payment_retry: RetryConfig,

    /// Accept `test-token:<uid>` bearer tokens. Never set from the
    /// environment; integration tests enable it explicitly.
    pub allow_test_tokens: bool,
}

/// Payment secrets file structure.
#[derive(Debug, Deserialize)]
struct PaymentSecrets {
    webhook_secret: String,
}

impl ServiceConfig {
    /// Load configuration from environment variables and secrets files.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let retry = defaults.payment_retry;

        Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            data_dir: std::env::var("DATA_DIR").unwrap_or(defaults.data_dir),
            auth_base_url: std::env::var("AUTH_BASE_URL").unwrap_or(defaults.auth_base_url),
            auth_audience: std::env::var("AUTH_AUDIENCE").unwrap_or(defaults.auth_audience),
            service_api_key: std::env::var("SERVICE_API_KEY").ok(),
            admin_api_key: std::env::var("ADMIN_API_KEY").ok(),
            payment_webhook_secret: load_payment_secret(),
            frontend_url: std::env::var("FRONTEND_URL").unwrap_or(defaults.frontend_url),
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: env_parse("MAX_BODY_BYTES").unwrap_or(defaults.max_body_bytes),
            request_timeout_seconds: env_parse("REQUEST_TIMEOUT_SECONDS")
                .unwrap_or(defaults.request_timeout_seconds),
            policy_file: std::env::var("POLICY_FILE").ok(),
            max_commit_attempts: env_parse("MAX_COMMIT_ATTEMPTS")
                .unwrap_or(defaults.max_commit_attempts),
            payment_retry: RetryConfig {
                max_retries: env_parse("PAYMENT_MAX_RETRIES").unwrap_or(retry.max_retries),
                backoff_ms: env_parse("PAYMENT_BACKOFF_MS").unwrap_or(retry.backoff_ms),
                backoff_factor: env_parse("PAYMENT_BACKOFF_FACTOR")
                    .unwrap_or(retry.backoff_factor),
                max_backoff_ms: env_parse("PAYMENT_MAX_BACKOFF_MS")
                    .unwrap_or(retry.max_backoff_ms),
            },
            allow_test_tokens: false,
        }
    }

    /// Load the feature policy registry.
    ///
    /// Uses `policy_file` when set, otherwise the built-in policies.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Configuration` if the file cannot be read or
    /// holds an invalid policy set.
    pub fn load_policies(&self) -> Result<PolicyRegistry, LedgerError> {
        let Some(path) = &self.policy_file else {
            return Ok(PolicyRegistry::default());
        };

        let contents = std::fs::read_to_string(path).map_err(|e| {
            LedgerError::Configuration(format!("cannot read policy file {path}: {e}"))
        })?;
        let registry = PolicyRegistry::from_json(&contents)?;
        tracing::info!(path = %path, features = registry.len(), "Loaded feature policies from file");
        Ok(registry)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

/// Load the payment webhook secret from file or environment.
fn load_payment_secret() -> Option<String> {
    let secret_paths = [
        ".secrets/payments.json",
        "service/.secrets/payments.json",
        "../.secrets/payments.json",
    ];

    for path in &secret_paths {
        if let Ok(secrets) = load_secrets_file::<PaymentSecrets>(path) {
            tracing::info!(path = %path, "Loaded payment secrets from file");
            return Some(secrets.webhook_secret);
        }
    }

    tracing::debug!("Payment secrets file not found, using environment variables");
    std::env::var("PAYMENT_WEBHOOK_SECRET").ok()
}

/// Load secrets from a JSON file.
fn load_secrets_file<T: serde::de::DeserializeOwned>(path: &str) -> Result<T, std::io::Error> {
    let path = Path::new(path);
    if !path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Secrets file not found",
        ));
    }
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            data_dir: "/data/astro-ledger".into(),
            auth_base_url: "https://auth.localhost".into(),
            auth_audience: "astro-ledger".into(),
            service_api_key: None,
            admin_api_key: None,
            payment_webhook_secret: None,
            frontend_url: "http://localhost:3000".into(),
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 30,
            policy_file: None,
            max_commit_attempts: DEFAULT_MAX_COMMIT_ATTEMPTS,
            payment_retry: RetryConfig::default(),
            allow_test_tokens: false,
        }
    }
}
