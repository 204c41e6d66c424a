//! Completion adapters for the supported language-model providers.
//!
//! Each provider speaks its own JSON dialect. An adapter owns exactly one
//! dialect: it builds the request, maps HTTP failures into [`ProviderError`]
//! (including the provider's rate-limit hints), and hands back the text, the
//! token usage and the untouched response body. Citation extraction happens
//! later, in [`crate::citation`], so adapters never look at citations.
//!
//! # Architecture
//!
//! - [`Provider`] - Closed set of supported providers
//! - [`ProviderAdapter`] - Async trait implemented once per provider
//! - [`OpenAiAdapter`], [`AnthropicAdapter`], [`GeminiAdapter`], [`PerplexityAdapter`]
//! - [`build_adapter`] - Constructs the adapter for a provider
//!
//! # Example
//!
//! ```no_run
//! use citetrack_core::provider::{build_adapter, HttpTimeouts, Provider, ProviderCallConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let adapter = build_adapter(Provider::Gemini, None, HttpTimeouts::default())?;
//! let config = ProviderCallConfig::new("api-key", "gemini-2.0-flash");
//! let response = adapter.complete("Best trail running shoes?", &config).await?;
//! println!("{} tokens", response.tokens_used);
//! # Ok(())
//! # }
//! ```

mod anthropic;
mod error;
mod gemini;
mod http_client;
mod openai;
mod perplexity;
mod pricing;
mod retry_hint;

pub use anthropic::AnthropicAdapter;
pub use error::ProviderError;
pub use gemini::GeminiAdapter;
pub use http_client::{
    DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_READ_TIMEOUT_SECS, HttpTimeouts,
    build_provider_http_client,
};
pub use openai::OpenAiAdapter;
pub use perplexity::PerplexityAdapter;
pub use pricing::estimate_cost;
pub use retry_hint::{MAX_RETRY_AFTER, parse_google_duration, parse_retry_after};

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default sampling temperature when a config does not set one.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Default completion token budget when a config does not set one.
pub const DEFAULT_MAX_TOKENS: u32 = 2048;

/// The supported completion providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// OpenAI chat completions (search-preview models for web grounding).
    OpenAi,
    /// Anthropic messages API with the server-side web search tool.
    Anthropic,
    /// Google Gemini `generateContent` with Google Search grounding.
    Gemini,
    /// Perplexity chat completions (always web-grounded).
    Perplexity,
}

impl Provider {
    /// Every supported provider, in a stable order.
    pub const ALL: [Provider; 4] = [
        Provider::OpenAi,
        Provider::Anthropic,
        Provider::Gemini,
        Provider::Perplexity,
    ];

    /// Returns the stable lowercase label used in config, logs and storage.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
            Self::Perplexity => "perplexity",
        }
    }

    /// Environment variable conventionally holding this provider's API key.
    #[must_use]
    pub fn default_api_key_env(self) -> &'static str {
        match self {
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::Gemini => "GEMINI_API_KEY",
            Self::Perplexity => "PERPLEXITY_API_KEY",
        }
    }

    /// Model used when the config does not name one.
    #[must_use]
    pub fn default_model(self) -> &'static str {
        match self {
            Self::OpenAi => "gpt-4o-search-preview",
            Self::Anthropic => "claude-sonnet-4-20250514",
            Self::Gemini => "gemini-2.0-flash",
            Self::Perplexity => "sonar",
        }
    }

    /// Documented requests-per-minute ceiling for a default-tier account.
    #[must_use]
    pub fn default_requests_per_minute(self) -> u32 {
        match self {
            Self::OpenAi | Self::Gemini => 60,
            Self::Anthropic | Self::Perplexity => 50,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a provider label is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown provider '{0}'\n  Suggestion: use one of openai, anthropic, gemini, perplexity")]
pub struct UnknownProvider(pub String);

impl FromStr for Provider {
    type Err = UnknownProvider;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "gemini" => Ok(Self::Gemini),
            "perplexity" => Ok(Self::Perplexity),
            _ => Err(UnknownProvider(value.to_string())),
        }
    }
}

/// Per-call settings for one provider request.
#[derive(Clone, PartialEq)]
pub struct ProviderCallConfig {
    /// Secret API key. Never logged.
    pub api_key: String,
    /// Provider model identifier.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum completion tokens.
    pub max_tokens: u32,
    /// ISO country code passed as approximate user location where supported.
    pub region: Option<String>,
}

impl ProviderCallConfig {
    /// Creates a config with default temperature and token budget.
    #[must_use]
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            region: None,
        }
    }

    /// Sets the sampling temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Sets the completion token budget.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Sets the approximate user location.
    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }
}

impl fmt::Debug for ProviderCallConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderCallConfig")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("region", &self.region)
            .finish()
    }
}

/// What an adapter returns for one successful completion.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResponse {
    /// Completion text.
    pub text: String,
    /// Provider-reported token usage, or an estimate when absent.
    pub tokens_used: u32,
    /// Model that actually served the request.
    pub model: String,
    /// Whether the provider ran a web search for this completion.
    pub web_search_used: bool,
    /// Complete response body, passed on to citation extraction.
    pub raw: serde_json::Value,
}

/// Trait implemented by every provider adapter.
///
/// Uses `async_trait` so the pipeline can hold `Arc<dyn ProviderAdapter>`.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Which provider this adapter talks to.
    fn provider(&self) -> Provider;

    /// Issues one completion request.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::RateLimited`] for quota errors (retryable) and
    /// other [`ProviderError`] variants for everything else.
    async fn complete(
        &self,
        prompt: &str,
        config: &ProviderCallConfig,
    ) -> Result<ProviderResponse, ProviderError>;
}

/// Builds the adapter for `provider`, optionally against a custom base URL.
///
/// # Errors
///
/// Returns [`ProviderError::Client`] when the HTTP client cannot be built.
pub fn build_adapter(
    provider: Provider,
    base_url: Option<&str>,
    timeouts: HttpTimeouts,
) -> Result<Arc<dyn ProviderAdapter>, ProviderError> {
    let adapter: Arc<dyn ProviderAdapter> = match (provider, base_url) {
        (Provider::OpenAi, Some(url)) => Arc::new(OpenAiAdapter::with_base_url(url, timeouts)?),
        (Provider::OpenAi, None) => Arc::new(OpenAiAdapter::new(timeouts)?),
        (Provider::Anthropic, Some(url)) => {
            Arc::new(AnthropicAdapter::with_base_url(url, timeouts)?)
        }
        (Provider::Anthropic, None) => Arc::new(AnthropicAdapter::new(timeouts)?),
        (Provider::Gemini, Some(url)) => Arc::new(GeminiAdapter::with_base_url(url, timeouts)?),
        (Provider::Gemini, None) => Arc::new(GeminiAdapter::new(timeouts)?),
        (Provider::Perplexity, Some(url)) => {
            Arc::new(PerplexityAdapter::with_base_url(url, timeouts)?)
        }
        (Provider::Perplexity, None) => Arc::new(PerplexityAdapter::new(timeouts)?),
    };
    Ok(adapter)
}

/// Approximates token usage as one token per four characters, rounded up.
#[must_use]
pub fn estimate_tokens(text: &str) -> u32 {
    let chars = text.chars().count();
    u32::try_from(chars.div_ceil(4)).unwrap_or(u32::MAX)
}

/// Returns `true` when an OpenAI-style model name denotes a search model.
pub(crate) fn is_search_model(model: &str) -> bool {
    model.to_ascii_lowercase().contains("search")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_round_trips_through_label() {
        for provider in Provider::ALL {
            assert_eq!(provider.as_str().parse::<Provider>().unwrap(), provider);
        }
    }

    #[test]
    fn test_provider_parse_is_case_insensitive() {
        assert_eq!(" Gemini ".parse::<Provider>().unwrap(), Provider::Gemini);
    }

    #[test]
    fn test_provider_parse_unknown_has_suggestion() {
        let err = "mistral".parse::<Provider>().unwrap_err();
        assert!(err.to_string().contains("mistral"));
        assert!(err.to_string().contains("Suggestion"));
    }

    #[test]
    fn test_provider_serde_uses_lowercase_label() {
        let json = serde_json::to_string(&Provider::OpenAi).unwrap();
        assert_eq!(json, "\"openai\"");
    }

    #[test]
    fn test_estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_estimate_tokens_counts_chars_not_bytes() {
        // four two-byte characters
        assert_eq!(estimate_tokens("éééé"), 1);
    }

    #[test]
    fn test_call_config_debug_redacts_key() {
        let config = ProviderCallConfig::new("sk-secret", "gpt-4o");
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("gpt-4o"));
    }

    #[test]
    fn test_call_config_builders() {
        let config = ProviderCallConfig::new("k", "m")
            .with_temperature(0.2)
            .with_max_tokens(512)
            .with_region("DE");
        assert!((config.temperature - 0.2).abs() < f32::EPSILON);
        assert_eq!(config.max_tokens, 512);
        assert_eq!(config.region.as_deref(), Some("DE"));
    }

    #[test]
    fn test_is_search_model() {
        assert!(is_search_model("gpt-4o-search-preview"));
        assert!(is_search_model("GPT-4o-mini-Search-Preview"));
        assert!(!is_search_model("gpt-4o"));
    }
}
