//! Perplexity chat completions adapter. Every Sonar call is web-grounded.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::debug;

use super::http_client::{HttpTimeouts, build_provider_http_client, send_json};
use super::openai::parse_chat_completion;
use super::{Provider, ProviderAdapter, ProviderCallConfig, ProviderError, ProviderResponse};

/// Default Perplexity API base URL.
const DEFAULT_BASE_URL: &str = "https://api.perplexity.ai";

/// Calls the Perplexity chat completions endpoint.
pub struct PerplexityAdapter {
    client: Client,
    base_url: String,
}

impl PerplexityAdapter {
    /// Creates an adapter against the public Perplexity API.
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
        let client = build_provider_http_client(Provider::Perplexity, timeouts)?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn request_body(prompt: &str, config: &ProviderCallConfig) -> Value {
        let mut body = json!({
            "model": config.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": config.temperature,
            "max_tokens": config.max_tokens,
        });
        if let Some(region) = &config.region {
            body["web_search_options"] = json!({"user_location": {"country": region}});
        }
        body
    }
}

impl std::fmt::Debug for PerplexityAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerplexityAdapter")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ProviderAdapter for PerplexityAdapter {
    fn provider(&self) -> Provider {
        Provider::Perplexity
    }

    #[tracing::instrument(skip(self, prompt, config), fields(provider = "perplexity", model = %config.model))]
    async fn complete(
        &self,
        prompt: &str,
        config: &ProviderCallConfig,
    ) -> Result<ProviderResponse, ProviderError> {
        if config.api_key.trim().is_empty() {
            return Err(ProviderError::missing_api_key(
                Provider::Perplexity,
                Provider::Perplexity.default_api_key_env(),
            ));
        }

        let url = format!("{}/chat/completions", self.base_url);
        debug!(api_url = %url, "Calling Perplexity chat completions");

        let request = self
            .client
            .post(&url)
            .bearer_auth(&config.api_key)
            .json(&Self::request_body(prompt, config));
        let raw = send_json(Provider::Perplexity, request).await?;
        let parts = parse_chat_completion(Provider::Perplexity, &raw, &config.model)?;

        Ok(ProviderResponse {
            text: parts.text,
            tokens_used: parts.tokens_used,
            model: parts.model,
            web_search_used: true,
            raw,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn adapter(server: &MockServer) -> PerplexityAdapter {
        PerplexityAdapter::with_base_url(server.uri(), HttpTimeouts::default()).unwrap()
    }

    fn config() -> ProviderCallConfig {
        ProviderCallConfig::new("pplx-test", "sonar")
    }

    #[tokio::test]
    async fn test_complete_success_keeps_search_results_in_raw() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer pplx-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "sonar",
                "choices": [{"message": {"role": "assistant", "content": "Acme is popular [1]."}}],
                "search_results": [{"title": "Acme", "url": "https://acme.com/", "date": "2025-01-01"}],
                "usage": {"total_tokens": 33}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let response = adapter(&server).complete("p", &config()).await.unwrap();
        assert_eq!(response.text, "Acme is popular [1].");
        assert_eq!(response.tokens_used, 33);
        assert!(response.web_search_used);
        assert_eq!(response.raw["search_results"][0]["url"], "https://acme.com/");
    }

    #[test]
    fn test_region_adds_user_location() {
        let body = PerplexityAdapter::request_body("p", &config().with_region("FR"));
        assert_eq!(body["web_search_options"]["user_location"]["country"], "FR");
        assert!(PerplexityAdapter::request_body("p", &config())
            .get("web_search_options")
            .is_none());
    }

    #[tokio::test]
    async fn test_complete_429_reads_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "3"))
            .mount(&server)
            .await;

        let err = adapter(&server).complete("p", &config()).await.unwrap_err();
        assert!(err.is_rate_limit());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
    }

    #[tokio::test]
    async fn test_complete_401_is_not_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid key"))
            .mount(&server)
            .await;

        let err = adapter(&server).complete("p", &config()).await.unwrap_err();
        assert!(!err.is_rate_limit());
        assert!(matches!(err, ProviderError::Http { status: 401, .. }));
    }
}
