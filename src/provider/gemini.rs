//! Google Gemini `generateContent` adapter with Google Search grounding.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::http_client::{HttpTimeouts, build_provider_http_client, send_json};
use super::{
    Provider, ProviderAdapter, ProviderCallConfig, ProviderError, ProviderResponse,
    estimate_tokens,
};

/// Default Gemini API base URL.
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    grounding_metadata: Option<GroundingSummary>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

/// Only what is needed to tell whether grounding ran.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingSummary {
    #[serde(default)]
    web_search_queries: Vec<String>,
    #[serde(default)]
    grounding_chunks: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    total_token_count: Option<u32>,
}

/// Calls the Gemini `generateContent` endpoint.
pub struct GeminiAdapter {
    client: Client,
    base_url: String,
}

impl GeminiAdapter {
    /// Creates an adapter against the public Gemini API.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Client`] if HTTP client construction fails.
    pub fn new(timeouts: HttpTimeouts) -> Result<Self, ProviderError> {
        Self::build(DEFAULT_BASE_URL.to_string(), timeouts)
    }

    /// Creates an adapter with a custom base URL (for testing with wiremock).
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Client`] if HTTP client construction fails.
    pub fn with_base_url(
        base_url: impl Into<String>,
        timeouts: HttpTimeouts,
    ) -> Result<Self, ProviderError> {
        Self::build(base_url.into(), timeouts)
    }

    fn build(base_url: String, timeouts: HttpTimeouts) -> Result<Self, ProviderError> {
        let client = build_provider_http_client(Provider::Gemini, timeouts)?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, model: &str) -> String {
        let model = model.strip_prefix("models/").unwrap_or(model);
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url,
            urlencoding::encode(model)
        )
    }

    fn request_body(prompt: &str, config: &ProviderCallConfig) -> Value {
        json!({
            "contents": [{"role": "user", "parts": [{"text": prompt}]}],
            "tools": [{"google_search": {}}],
            "generationConfig": {
                "temperature": config.temperature,
                "maxOutputTokens": config.max_tokens,
            },
        })
    }
}

impl std::fmt::Debug for GeminiAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiAdapter")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn provider(&self) -> Provider {
        Provider::Gemini
    }

    #[tracing::instrument(skip(self, prompt, config), fields(provider = "gemini", model = %config.model))]
    async fn complete(
        &self,
        prompt: &str,
        config: &ProviderCallConfig,
    ) -> Result<ProviderResponse, ProviderError> {
        if config.api_key.trim().is_empty() {
            return Err(ProviderError::missing_api_key(
                Provider::Gemini,
                Provider::Gemini.default_api_key_env(),
            ));
        }

        let url = self.endpoint(&config.model);
        debug!(api_url = %url, "Calling Gemini generateContent");

        let request = self
            .client
            .post(&url)
            .header("x-goog-api-key", &config.api_key)
            .json(&Self::request_body(prompt, config));
        let raw = send_json(Provider::Gemini, request).await?;

        let envelope = GenerateContentResponse::deserialize(&raw).map_err(|e| {
            ProviderError::decode(Provider::Gemini, format!("invalid generateContent response: {e}"))
        })?;

        let Some(candidate) = envelope.candidates.into_iter().next() else {
            return Err(ProviderError::decode(
                Provider::Gemini,
                "response has no candidates (prompt may have been blocked)",
            ));
        };

        let text: String = candidate
            .content
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect()
            })
            .unwrap_or_default();
        let web_search_used = candidate.grounding_metadata.is_some_and(|grounding| {
            !grounding.web_search_queries.is_empty() || !grounding.grounding_chunks.is_empty()
        });
        let tokens_used = envelope
            .usage_metadata
            .and_then(|usage| usage.total_token_count)
            .unwrap_or_else(|| estimate_tokens(&text));

        Ok(ProviderResponse {
            text,
            tokens_used,
            model: envelope
                .model_version
                .unwrap_or_else(|| config.model.clone()),
            web_search_used,
            raw,
        })
    }
}
