//! Error type for retrying provider calls.

use thiserror::Error;

use crate::provider::{Provider, ProviderError};

/// Why a retried provider call ultimately failed.
#[derive(Debug, Error)]
pub enum CallError {
    /// Every attempt hit a rate limit.
    #[error("{provider} still rate limited after {attempts} attempts: {last_detail}")]
    ExhaustedRetries {
        /// Provider that kept rate limiting.
        provider: Provider,
        /// Attempts made, including the first.
        attempts: u32,
        /// Message of the final rate-limit error.
        last_detail: String,
    },

    /// A non-retryable provider failure, returned on first occurrence.
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl CallError {
    /// The provider the failed call targeted.
    #[must_use]
    pub fn provider(&self) -> Provider {
        match self {
            Self::ExhaustedRetries { provider, .. } => *provider,
            Self::Provider(error) => error.provider(),
        }
    }

    /// Returns `true` when the call gave up on rate limits.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::ExhaustedRetries { .. })
    }
}
