//! Client error types.

/// Errors that can occur when using the astro-ledger client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server returned an error response.
    #[error("API error: {code} - {message}")]
    Api {
        /// Error code.
        code: String,
        /// Error message.
        message: String,
        /// HTTP status code.
        status: u16,
    },

    /// The balance does not cover one use.
    #[error("insufficient credits: balance={balance}, required={required}")]
    InsufficientCredits {
        /// Credit type that was short.
        credit_type: Option<String>,
        /// Current balance.
        balance: i64,
        /// Required amount.
        required: i64,
        /// Where to send the user to buy more.
        redirect_hint: Option<String>,
    },

    /// The feature has no access policy on the server.
    #[error("no access policy for feature: {feature_key}")]
    PolicyNotFound {
        /// The feature key.
        feature_key: String,
    },

    /// The user has no account.
    #[error("account not found: {message}")]
    AccountNotFound {
        /// Server message.
        message: String,
    },

    /// Credentials were missing or rejected.
    #[error("unauthorized")]
    Unauthorized,

    /// The server was too busy to commit; the request may be retried.
    #[error("service temporarily unavailable")]
    Unavailable,

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ClientError {
    /// Whether retrying the same request may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unavailable => true,
            Self::Http(err) => err.is_timeout() || err.is_connect(),
            _ => false,
        }
    }
}
