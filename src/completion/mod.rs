//! Rate-limited, retried provider calls.
//!
//! [`RateLimiter`] gates every outbound call through a per-provider sliding
//! window. [`RetryingCaller`] wraps a [`crate::provider::ProviderAdapter`],
//! retries rate-limit failures, and turns the first success into a
//! [`CompletionResult`] with citations already extracted.

mod constants;
mod error;
mod rate_limiter;
mod retry;

pub use constants::{
    ADMISSION_MARGIN, DEFAULT_MAX_JITTER, DEFAULT_MAX_RETRIES, DEFAULT_RATE_LIMIT_DELAY,
    DEFAULT_REQUESTS_PER_MINUTE, RATE_WINDOW,
};
pub use error::CallError;
pub use rate_limiter::RateLimiter;
pub use retry::{CallState, RetryingCaller};

use serde::Serialize;

use crate::citation::RawCitation;
use crate::provider::Provider;

/// One successful provider completion. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionResult {
    pub provider: Provider,
    pub text: String,
    pub tokens_used: u32,
    /// Model that served the request.
    pub model: String,
    /// Informational USD estimate.
    pub cost_estimate: f64,
    /// Wall time of the successful attempt, admission wait included. Earlier
    /// rate-limited attempts and their sleeps are not counted.
    pub execution_time_ms: u64,
    /// `None` when the payload carried no usable citations.
    pub raw_citations: Option<Vec<RawCitation>>,
    pub has_web_search: bool,
}
