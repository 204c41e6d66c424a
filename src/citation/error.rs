//! Citation extraction errors.

use thiserror::Error;

use crate::provider::Provider;

/// Errors raised by a per-provider citation extractor.
///
/// Never escapes [`super::extract_citations`]; the dispatcher logs it and
/// yields no citations.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The citation-bearing part of the payload did not have the expected shape.
    #[error("malformed {provider} citation source: {reason}")]
    MalformedCitationSource {
        /// Provider whose payload was malformed.
        provider: Provider,
        /// What did not match.
        reason: String,
    },
}

impl ExtractError {
    /// Creates a malformed-source error.
    pub fn malformed(provider: Provider, reason: impl Into<String>) -> Self {
        Self::MalformedCitationSource {
            provider,
            reason: reason.into(),
        }
    }
}
