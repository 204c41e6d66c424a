//! Rate-limit detection and retry-hint parsing for provider responses.
//!
//! Providers signal quota exhaustion in different ways: plain HTTP 429 with a
//! `Retry-After` header, a millisecond `retry-after-ms` header, or a Google
//! RPC error body whose `details` carry `RetryInfo.retryDelay` and a
//! `QuotaFailure` block. Everything here turns those into a
//! [`ProviderError::RateLimited`] with an optional delay.

use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde_json::Value;
use tracing::{debug, warn};

use super::{Provider, ProviderError};

/// Maximum honoured retry hint (1 hour).
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

const RETRY_AFTER_MS_HEADER: &str = "retry-after-ms";
const RETRY_INFO_TYPE: &str = "type.googleapis.com/google.rpc.RetryInfo";
const QUOTA_FAILURE_TYPE: &str = "type.googleapis.com/google.rpc.QuotaFailure";

/// Maps a non-success response to a typed provider error.
pub(crate) fn error_for_status(
    provider: Provider,
    status: u16,
    headers: &HeaderMap,
    body: &str,
) -> ProviderError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();

    if status == 429 || parsed.as_ref().is_some_and(is_quota_exhausted) {
        let retry_after = parsed
            .as_ref()
            .and_then(retry_delay_from_body)
            .or_else(|| retry_after_from_headers(headers));
        let detail = parsed
            .as_ref()
            .and_then(error_message)
            .unwrap_or_else(|| format!("HTTP {status}"));
        debug!(
            %provider,
            status,
            retry_after_ms = retry_after.map(|d| d.as_millis()),
            "provider rate limit"
        );
        return ProviderError::rate_limited(provider, retry_after, detail);
    }

    ProviderError::http(provider, status, body)
}

/// Returns `true` when an error body reports an exhausted quota.
fn is_quota_exhausted(body: &Value) -> bool {
    let error = &body["error"];
    if error["status"].as_str() == Some("RESOURCE_EXHAUSTED") {
        return true;
    }
    error["details"].as_array().is_some_and(|details| {
        details
            .iter()
            .any(|detail| detail["@type"].as_str() == Some(QUOTA_FAILURE_TYPE))
    })
}

/// Reads `RetryInfo.retryDelay` out of a Google RPC error body.
fn retry_delay_from_body(body: &Value) -> Option<Duration> {
    body["error"]["details"]
        .as_array()?
        .iter()
        .filter(|detail| detail["@type"].as_str() == Some(RETRY_INFO_TYPE))
        .find_map(|detail| detail["retryDelay"].as_str().and_then(parse_google_duration))
}

/// Reads `retry-after-ms`, then `Retry-After`.
fn retry_after_from_headers(headers: &HeaderMap) -> Option<Duration> {
    if let Some(delay) = headers
        .get(RETRY_AFTER_MS_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<f64>().ok())
        .and_then(|ms| duration_from_secs_f64(ms / 1000.0))
    {
        return Some(delay);
    }

    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_retry_after)
}

fn error_message(body: &Value) -> Option<String> {
    match &body["error"] {
        Value::String(message) => Some(message.clone()),
        error => error["message"].as_str().map(str::to_string),
    }
}

fn cap_retry_after(delay: Duration) -> Duration {
    if delay > MAX_RETRY_AFTER {
        warn!(
            delay_secs = delay.as_secs(),
            max_secs = MAX_RETRY_AFTER.as_secs(),
            "retry hint exceeds maximum, capping at 1 hour"
        );
        return MAX_RETRY_AFTER;
    }
    delay
}

/// Parses a protobuf JSON duration such as `"17s"` or `"0.250s"`.
///
/// Values above one hour, including ones too large to represent, are capped.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use citetrack_core::provider::parse_google_duration;
///
/// assert_eq!(parse_google_duration("17s"), Some(Duration::from_secs(17)));
/// assert_eq!(parse_google_duration("1.5s"), Some(Duration::from_millis(1500)));
/// assert_eq!(parse_google_duration("soon"), None);
/// ```
#[must_use]
pub fn parse_google_duration(value: &str) -> Option<Duration> {
    let seconds = value.trim().strip_suffix('s')?.parse::<f64>().ok()?;
    duration_from_secs_f64(seconds)
}

/// Converts provider-supplied float seconds, capping instead of overflowing.
fn duration_from_secs_f64(seconds: f64) -> Option<Duration> {
    if seconds.is_nan() || seconds < 0.0 {
        return None;
    }
    let delay = Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX);
    Some(cap_retry_after(delay))
}

/// Parses a Retry-After header value into a Duration.
///
/// Supports integer seconds and RFC 7231 HTTP-dates. Past dates yield zero;
/// values above one hour are capped.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use citetrack_core::provider::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("invalid"), None);
/// ```
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        }
        #[allow(clippy::cast_sign_loss)]
        return Some(cap_retry_after(Duration::from_secs(seconds as u64)));
    }

    match httpdate::parse_http_date(header_value) {
        Ok(datetime) => Some(
            datetime
                .duration_since(std::time::SystemTime::now())
                .map_or(Duration::ZERO, cap_retry_after),
        ),
        Err(_) => {
            debug!(header_value, "unparseable Retry-After value");
            None
        }
    }
}
