//! Anthropic messages adapter with the server-side web search tool.

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

/// Default Anthropic API base URL.
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Web search tool revision.
const WEB_SEARCH_TOOL: &str = "web_search_20250305";

/// Searches the model may run per request.
const WEB_SEARCH_MAX_USES: u32 = 5;

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<MessagesUsage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessagesUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

/// Calls the Anthropic messages endpoint.
pub struct AnthropicAdapter {
    client: Client,
    base_url: String,
}

impl AnthropicAdapter {
    /// Creates an adapter against the public Anthropic API.
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
        let client = build_provider_http_client(Provider::Anthropic, timeouts)?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn request_body(prompt: &str, config: &ProviderCallConfig) -> Value {
        let mut tool = json!({
            "type": WEB_SEARCH_TOOL,
            "name": "web_search",
            "max_uses": WEB_SEARCH_MAX_USES,
        });
        if let Some(region) = &config.region {
            tool["user_location"] = json!({"type": "approximate", "country": region});
        }

        json!({
            "model": config.model,
            "max_tokens": config.max_tokens,
            "temperature": config.temperature,
            "messages": [{"role": "user", "content": prompt}],
            "tools": [tool],
        })
    }
}

impl std::fmt::Debug for AnthropicAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicAdapter")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    #[tracing::instrument(skip(self, prompt, config), fields(provider = "anthropic", model = %config.model))]
    async fn complete(
        &self,
        prompt: &str,
        config: &ProviderCallConfig,
    ) -> Result<ProviderResponse, ProviderError> {
        if config.api_key.trim().is_empty() {
            return Err(ProviderError::missing_api_key(
                Provider::Anthropic,
                Provider::Anthropic.default_api_key_env(),
            ));
        }

        let url = format!("{}/v1/messages", self.base_url);
        debug!(api_url = %url, "Calling Anthropic messages");

        let request = self
            .client
            .post(&url)
            .header("x-api-key", &config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&Self::request_body(prompt, config));
        let raw = send_json(Provider::Anthropic, request).await?;

        let envelope = MessagesResponse::deserialize(&raw).map_err(|e| {
            ProviderError::decode(Provider::Anthropic, format!("invalid messages response: {e}"))
        })?;

        let text: String = envelope
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text.as_deref())
            .collect();
        let web_search_used = envelope
            .content
            .iter()
            .any(|block| block.kind == "server_tool_use" || block.kind == "web_search_tool_result");
        let tokens_used = envelope
            .usage
            .map(|usage| usage.input_tokens.saturating_add(usage.output_tokens))
            .filter(|total| *total > 0)
            .unwrap_or_else(|| estimate_tokens(&text));

        Ok(ProviderResponse {
            text,
            tokens_used,
            model: envelope.model.unwrap_or_else(|| config.model.clone()),
            web_search_used,
            raw,
        })
    }
}
