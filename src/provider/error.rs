//! Error types for provider adapters.

use std::time::Duration;

use thiserror::Error;

use super::Provider;

/// Longest response body excerpt kept in an error message.
const MAX_BODY_EXCERPT_CHARS: usize = 500;

/// Errors that can occur while calling a provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider rejected the request for quota reasons. Retryable.
    #[error("rate limited by {provider}: {detail}")]
    RateLimited {
        /// Provider that returned the rate limit.
        provider: Provider,
        /// Provider-declared wait before the next attempt, when given.
        retry_after: Option<Duration>,
        /// Short description of the rate-limit response.
        detail: String,
    },

    /// Non-success HTTP response that is not a rate limit.
    #[error("HTTP {status} from {provider}: {body}")]
    Http {
        /// Provider that returned the status.
        provider: Provider,
        /// The HTTP status code.
        status: u16,
        /// Excerpt of the response body.
        body: String,
    },

    /// Network-level failure (DNS, connect, TLS, timeout).
    #[error("network error calling {provider}: {source}")]
    Network {
        /// Provider being called.
        provider: Provider,
        /// The underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// The response was 2xx but its envelope was not understood.
    #[error("unexpected {provider} response: {reason}")]
    Decode {
        /// Provider that returned the response.
        provider: Provider,
        /// What was wrong with the body.
        reason: String,
    },

    /// No API key is available for the provider.
    #[error("no API key configured for {provider}\n  Suggestion: set {env_var} or add api_key to the [providers.{provider}] config section")]
    MissingApiKey {
        /// Provider without a key.
        provider: Provider,
        /// Environment variable that was consulted.
        env_var: String,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client for {provider}: {reason}")]
    Client {
        /// Provider whose client failed.
        provider: Provider,
        /// Why construction failed.
        reason: String,
    },
}

impl ProviderError {
    /// Creates a rate-limit error.
    pub fn rate_limited(
        provider: Provider,
        retry_after: Option<Duration>,
        detail: impl Into<String>,
    ) -> Self {
        Self::RateLimited {
            provider,
            retry_after,
            detail: detail.into(),
        }
    }

    /// Creates an HTTP status error, truncating the body.
    pub fn http(provider: Provider, status: u16, body: &str) -> Self {
        Self::Http {
            provider,
            status,
            body: excerpt(body),
        }
    }

    /// Creates a network error from a reqwest error.
    pub fn network(provider: Provider, source: reqwest::Error) -> Self {
        Self::Network { provider, source }
    }

    /// Creates a decode error.
    pub fn decode(provider: Provider, reason: impl Into<String>) -> Self {
        Self::Decode {
            provider,
            reason: reason.into(),
        }
    }

    /// Creates a missing-key error pointing at the consulted variable.
    pub fn missing_api_key(provider: Provider, env_var: impl Into<String>) -> Self {
        Self::MissingApiKey {
            provider,
            env_var: env_var.into(),
        }
    }

    /// Creates a client construction error.
    pub fn client(provider: Provider, reason: impl Into<String>) -> Self {
        Self::Client {
            provider,
            reason: reason.into(),
        }
    }

    /// Returns `true` for quota errors that the retrying caller may retry.
    #[must_use]
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Provider-declared retry delay, if this is a rate limit that carried one.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// The provider this error belongs to.
    #[must_use]
    pub fn provider(&self) -> Provider {
        match self {
            Self::RateLimited { provider, .. }
            | Self::Http { provider, .. }
            | Self::Network { provider, .. }
            | Self::Decode { provider, .. }
            | Self::MissingApiKey { provider, .. }
            | Self::Client { provider, .. } => *provider,
        }
    }
}

fn excerpt(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= MAX_BODY_EXCERPT_CHARS {
        return trimmed.to_string();
    }
    let mut cut: String = trimmed.chars().take(MAX_BODY_EXCERPT_CHARS).collect();
    cut.push_str("...");
    cut
}
