//! Error taxonomy for the gateway

use thiserror::Error;

use crate::provider::ProviderKind;

/// Result type alias using the gateway's [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds produced anywhere in the gateway.
///
/// Only [`Error::AllProvidersFailed`], [`Error::ConfigInvalid`] and
/// [`Error::Cancelled`] are meant to cross the `UnifiedAdapter` boundary;
/// everything else is absorbed by retry/failover along the way.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration is missing a required field or names an unsupported provider
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Provider returned a non-2xx HTTP status
    #[error("provider http error {status}: {body_head}")]
    ProviderHttp {
        /// HTTP status code
        status: u16,
        /// First slice of the response body, for logging
        body_head: String,
    },

    /// Connection reset/refused, DNS failure, or request timeout
    #[error("provider transport error: {0}")]
    ProviderTransport(String),

    /// Provider response was not valid JSON or didn't match the expected shape
    #[error("provider schema error: {0}")]
    ProviderSchema(String),

    /// The provider's circuit breaker disallows execution right now.
    ///
    /// Never surfaced on its own: the failover controller catches this and
    /// skips to the next candidate. It only escapes wrapped inside
    /// [`Error::AllProvidersFailed`] when every candidate was skipped.
    #[error("circuit open for provider {provider}")]
    CircuitOpen {
        /// Provider whose breaker is open
        provider: ProviderKind,
    },

    /// The rate limiter did not grant a token in time
    #[error("rate limit exceeded for provider {provider}")]
    RateLimitExceeded {
        /// Provider the rate limit key belongs to
        provider: ProviderKind,
    },

    /// The caller's cancellation token fired
    #[error("request cancelled")]
    Cancelled,

    /// Every candidate provider was skipped or failed
    #[error("all providers failed: {cause}")]
    AllProvidersFailed {
        /// The last non-skipped underlying cause
        cause: Box<Error>,
    },

    /// Low-level HTTP failure from `reqwest`
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO failure reading config files or log directories
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file failed to parse
    #[error("config parse error: {0}")]
    ConfigParse(#[from] serde_yaml_ng::Error),

    /// Anything else, wrapped for convenience at library boundaries
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Build a [`Error::ConfigInvalid`] from any displayable message
    pub fn config_invalid(msg: impl Into<String>) -> Self {
        Self::ConfigInvalid(msg.into())
    }

    /// Whether this error represents a transient condition worth retrying.
    ///
    /// 408, 429, and 5xx are retryable; everything else (4xx other than
    /// 408/429, schema errors, cancellation) is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ProviderHttp { status, .. } => {
                *status == 408 || *status == 429 || (500..600).contains(status)
            }
            Self::ProviderTransport(_) => true,
            Self::RateLimitExceeded { .. } => true,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Match against the retryable-error substring list a [`crate::retry::RetryPolicy`]
    /// is configured with (by default: timeout, connection reset, 429, 502,
    /// 503, 504).
    pub fn matches_any_token(&self, tokens: &[String]) -> bool {
        let text = self.to_string().to_lowercase();
        tokens.iter().any(|t| text.contains(&t.to_lowercase()))
    }
}
