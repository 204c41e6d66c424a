//! Shared HTTP client construction and JSON round-trips for provider adapters.
//!
//! Every adapter builds its client here so timeouts, user-agent and
//! compression stay consistent across providers.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::{Client, ClientBuilder, Proxy, RequestBuilder};
use serde_json::Value;
use tracing::{debug, warn};

use crate::user_agent;

use super::retry_hint::error_for_status;
use super::{Provider, ProviderError};

/// Default connect timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default read timeout in seconds. Web-grounded completions are slow.
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 120;

/// Connect and read timeouts applied to provider clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    /// TCP/TLS connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Whole-request timeout in seconds.
    pub read_timeout_secs: u64,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            read_timeout_secs: DEFAULT_READ_TIMEOUT_SECS,
        }
    }
}

/// Builds a provider HTTP client using the shared policy.
///
/// # Errors
///
/// Returns [`ProviderError::Client`] when client construction fails.
pub fn build_provider_http_client(
    provider: Provider,
    timeouts: HttpTimeouts,
) -> Result<Client, ProviderError> {
    match try_build_client(timeouts, false) {
        Ok(client) => Ok(client),
        Err(BuildClientFailure::Panic) => {
            // System proxy lookup can panic in sandboxed environments; retry with
            // env proxies only.
            warn!(
                %provider,
                "provider client hit system proxy panic; using env-proxy fallback builder"
            );
            match try_build_client(timeouts, true) {
                Ok(client) => Ok(client),
                Err(BuildClientFailure::Panic) => Err(ProviderError::client(
                    provider,
                    "HTTP client construction panicked",
                )),
                Err(BuildClientFailure::Build(error)) => Err(ProviderError::client(
                    provider,
                    format!("HTTP client construction failed: {error}"),
                )),
            }
        }
        Err(BuildClientFailure::Build(error)) => Err(ProviderError::client(
            provider,
            format!("HTTP client construction failed: {error}"),
        )),
    }
}

enum BuildClientFailure {
    Panic,
    Build(reqwest::Error),
}

fn try_build_client(
    timeouts: HttpTimeouts,
    disable_system_proxy_lookup: bool,
) -> Result<Client, BuildClientFailure> {
    catch_unwind(AssertUnwindSafe(move || {
        let mut builder = base_builder(timeouts);
        if disable_system_proxy_lookup {
            builder = apply_env_proxy_fallback(builder.no_proxy());
        }
        builder.build().map_err(BuildClientFailure::Build)
    }))
    .map_err(|_| BuildClientFailure::Panic)?
}

fn base_builder(timeouts: HttpTimeouts) -> ClientBuilder {
    Client::builder()
        .connect_timeout(Duration::from_secs(timeouts.connect_timeout_secs))
        .timeout(Duration::from_secs(timeouts.read_timeout_secs))
        .user_agent(user_agent::default_provider_user_agent())
        .gzip(true)
}

fn apply_env_proxy_fallback(mut builder: ClientBuilder) -> ClientBuilder {
    if let Some(proxy) = find_first_env(&["HTTPS_PROXY", "https_proxy", "ALL_PROXY", "all_proxy"])
        && let Ok(resolved) = Proxy::https(&proxy)
    {
        builder = builder.proxy(resolved);
    }
    if let Some(proxy) = find_first_env(&["HTTP_PROXY", "http_proxy", "ALL_PROXY", "all_proxy"])
        && let Ok(resolved) = Proxy::http(&proxy)
    {
        builder = builder.proxy(resolved);
    }
    builder
}

fn find_first_env(names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| {
        std::env::var(name)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

/// Sends a prepared request and decodes a JSON body.
///
/// Non-success statuses are mapped through the rate-limit classifier so
/// adapters only deal with a successful body.
pub(crate) async fn send_json(
    provider: Provider,
    request: RequestBuilder,
) -> Result<Value, ProviderError> {
    let response = request
        .send()
        .await
        .map_err(|e| ProviderError::network(provider, e))?;

    let status = response.status();
    let headers: HeaderMap = response.headers().clone();
    let body = response
        .text()
        .await
        .map_err(|e| ProviderError::network(provider, e))?;

    if !status.is_success() {
        debug!(%provider, status = status.as_u16(), "provider returned error status");
        return Err(error_for_status(provider, status.as_u16(), &headers, &body));
    }

    serde_json::from_str(&body)
        .map_err(|e| ProviderError::decode(provider, format!("response is not JSON: {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeouts() {
        let timeouts = HttpTimeouts::default();
        assert_eq!(timeouts.connect_timeout_secs, 10);
        assert_eq!(timeouts.read_timeout_secs, 120);
    }

    #[test]
    fn test_build_client_succeeds_with_custom_timeouts() {
        let timeouts = HttpTimeouts {
            connect_timeout_secs: 1,
            read_timeout_secs: 5,
        };
        assert!(build_provider_http_client(Provider::OpenAi, timeouts).is_ok());
    }
}
