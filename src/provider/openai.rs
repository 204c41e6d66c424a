//! OpenAI chat completions adapter.
//!
//! Web grounding comes from the `*-search-preview` models, which take a
//! `web_search_options` object and reject `temperature`. Other models are
//! called as plain chat completions.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::http_client::{HttpTimeouts, build_provider_http_client, send_json};
use super::{
    Provider, ProviderAdapter, ProviderCallConfig, ProviderError, ProviderResponse,
    estimate_tokens, is_search_model,
};

/// Default OpenAI API base URL.
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

// ==================== Chat Completion Envelope ====================

/// Chat completion envelope shared by OpenAI-compatible providers.
#[derive(Debug, Deserialize)]
pub(super) struct ChatCompletion {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ChatChoice {
    pub message: ChatMessage,
}

#[derive(Debug, Deserialize)]
pub(super) struct ChatMessage {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ChatUsage {
    #[serde(default)]
    pub total_tokens: Option<u32>,
}

/// Text, token usage and serving model pulled out of a chat completion body.
pub(super) struct ChatParts {
    pub text: String,
    pub tokens_used: u32,
    pub model: String,
}

/// Parses an OpenAI-compatible chat completion body.
pub(super) fn parse_chat_completion(
    provider: Provider,
    raw: &Value,
    requested_model: &str,
) -> Result<ChatParts, ProviderError> {
    let envelope = ChatCompletion::deserialize(raw)
        .map_err(|e| ProviderError::decode(provider, format!("invalid chat completion: {e}")))?;

    let Some(choice) = envelope.choices.into_iter().next() else {
        return Err(ProviderError::decode(provider, "response has no choices"));
    };
    let text = choice.message.content.unwrap_or_default();
    let tokens_used = envelope
        .usage
        .and_then(|usage| usage.total_tokens)
        .unwrap_or_else(|| estimate_tokens(&text));
    let model = envelope
        .model
        .unwrap_or_else(|| requested_model.to_string());

    Ok(ChatParts {
        text,
        tokens_used,
        model,
    })
}

// ==================== OpenAiAdapter ====================

/// Calls the OpenAI chat completions endpoint.
pub struct OpenAiAdapter {
    client: Client,
    base_url: String,
}

impl OpenAiAdapter {
    /// Creates an adapter against the public OpenAI API.
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
        let client = build_provider_http_client(Provider::OpenAi, timeouts)?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn request_body(prompt: &str, config: &ProviderCallConfig) -> Value {
        let mut body = json!({
            "model": config.model,
            "messages": [{"role": "user", "content": prompt}],
            "max_completion_tokens": config.max_tokens,
        });

        if is_search_model(&config.model) {
            let mut options = json!({});
            if let Some(region) = &config.region {
                options["user_location"] = json!({
                    "type": "approximate",
                    "approximate": {"country": region},
                });
            }
            body["web_search_options"] = options;
        } else {
            body["temperature"] = json!(config.temperature);
        }
        body
    }
}

impl std::fmt::Debug for OpenAiAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiAdapter")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn provider(&self) -> Provider {
        Provider::OpenAi
    }

    #[tracing::instrument(skip(self, prompt, config), fields(provider = "openai", model = %config.model))]
    async fn complete(
        &self,
        prompt: &str,
        config: &ProviderCallConfig,
    ) -> Result<ProviderResponse, ProviderError> {
        if config.api_key.trim().is_empty() {
            return Err(ProviderError::missing_api_key(
                Provider::OpenAi,
                Provider::OpenAi.default_api_key_env(),
            ));
        }

        let url = format!("{}/chat/completions", self.base_url);
        debug!(api_url = %url, "Calling OpenAI chat completions");

        let request = self
            .client
            .post(&url)
            .bearer_auth(&config.api_key)
            .json(&Self::request_body(prompt, config));
        let raw = send_json(Provider::OpenAi, request).await?;
        let parts = parse_chat_completion(Provider::OpenAi, &raw, &config.model)?;

        Ok(ProviderResponse {
            text: parts.text,
            tokens_used: parts.tokens_used,
            web_search_used: is_search_model(&config.model),
            model: parts.model,
            raw,
        })
    }
}
