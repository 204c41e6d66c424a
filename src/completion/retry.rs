//! Rate-limit-aware retry around a provider adapter.
//!
//! Only rate-limit errors are retried. Every other failure is returned on
//! first occurrence. The retry loop is an explicit state machine:
//!
//! ```text
//! Attempting(n) --Ok-------------------------> Succeeded
//! Attempting(n) --RateLimited, n < max-------> WaitingForRateLimit(n) --> Attempting(n+1)
//! Attempting(n) --RateLimited, n == max------> Failed(ExhaustedRetries)
//! Attempting(n) --other error----------------> Failed(Provider)
//! ```

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::citation::extract_citations;
use crate::provider::{ProviderAdapter, ProviderCallConfig, ProviderResponse, estimate_cost};

use super::constants::{DEFAULT_MAX_JITTER, DEFAULT_MAX_RETRIES, DEFAULT_RATE_LIMIT_DELAY};
use super::{CallError, CompletionResult, RateLimiter};

/// States of one retried call.
#[derive(Debug)]
pub enum CallState {
    /// About to pass the rate limiter and call the provider (1-based attempt).
    Attempting { attempt: u32 },
    /// Attempt `attempt` was rate limited; sleeping `delay` before the next.
    WaitingForRateLimit { attempt: u32, delay: Duration },
    /// The provider answered. `elapsed` is the admission wait plus the call of
    /// this attempt only; earlier attempts and rate-limit sleeps are excluded.
    Succeeded {
        response: ProviderResponse,
        elapsed: Duration,
    },
    /// Terminal failure.
    Failed(CallError),
}

/// Calls a provider adapter through the shared [`RateLimiter`], retrying
/// rate-limit failures.
///
/// Holds no per-call state, so re-invoking [`RetryingCaller::call`] is safe.
#[derive(Debug, Clone)]
pub struct RetryingCaller {
    rate_limiter: Arc<RateLimiter>,
    max_retries: u32,
    max_jitter: Duration,
}

impl RetryingCaller {
    /// Creates a caller with the default attempt budget and jitter.
    #[must_use]
    pub fn new(rate_limiter: Arc<RateLimiter>) -> Self {
        Self {
            rate_limiter,
            max_retries: DEFAULT_MAX_RETRIES,
            max_jitter: DEFAULT_MAX_JITTER,
        }
    }

    /// Sets the total attempt budget (minimum 1).
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    /// Sets the upper bound of jitter added to rate-limit waits.
    #[must_use]
    pub fn with_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    /// Returns the attempt budget.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Returns the shared rate limiter.
    #[must_use]
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    /// Calls `adapter` until it succeeds, fails for a non-rate-limit reason,
    /// or exhausts the attempt budget on rate limits.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::ExhaustedRetries`] after `max_retries` rate-limited
    /// attempts and [`CallError::Provider`] for any other failure.
    #[instrument(skip(self, adapter, prompt, config), fields(provider = %adapter.provider(), model = %config.model))]
    pub async fn call(
        &self,
        adapter: &dyn ProviderAdapter,
        prompt: &str,
        config: &ProviderCallConfig,
    ) -> Result<CompletionResult, CallError> {
        let provider = adapter.provider();
        let mut state = CallState::Attempting { attempt: 1 };

        loop {
            state = match state {
                CallState::Attempting { attempt } => {
                    let started = Instant::now();
                    let waited = self.rate_limiter.admit(provider).await;
                    debug!(attempt, wait_ms = waited.as_millis(), "calling provider");

                    match adapter.complete(prompt, config).await {
                        Ok(response) => CallState::Succeeded {
                            response,
                            elapsed: started.elapsed(),
                        },
                        Err(error) if error.is_rate_limit() && attempt < self.max_retries => {
                            let delay = error.retry_after().unwrap_or(DEFAULT_RATE_LIMIT_DELAY)
                                + self.jitter();
                            info!(
                                attempt,
                                max_retries = self.max_retries,
                                delay_ms = delay.as_millis(),
                                "rate limited, retrying"
                            );
                            CallState::WaitingForRateLimit { attempt, delay }
                        }
                        Err(error) if error.is_rate_limit() => {
                            warn!(attempts = attempt, error = %error, "rate limit retries exhausted");
                            CallState::Failed(CallError::ExhaustedRetries {
                                provider,
                                attempts: attempt,
                                last_detail: error.to_string(),
                            })
                        }
                        Err(error) => {
                            debug!(attempt, error = %error, "non-retryable provider failure");
                            CallState::Failed(CallError::Provider(error))
                        }
                    }
                }
                CallState::WaitingForRateLimit { attempt, delay } => {
                    tokio::time::sleep(delay).await;
                    CallState::Attempting {
                        attempt: attempt + 1,
                    }
                }
                CallState::Succeeded { response, elapsed } => {
                    return Ok(completion_result(adapter, response, elapsed));
                }
                CallState::Failed(error) => return Err(error),
            };
        }
    }

    /// Random jitter in `[0, max_jitter]`.
    #[allow(clippy::cast_possible_truncation)]
    fn jitter(&self) -> Duration {
        let max_ms = self.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}

#[allow(clippy::cast_possible_truncation)]
fn completion_result(
    adapter: &dyn ProviderAdapter,
    response: ProviderResponse,
    elapsed: Duration,
) -> CompletionResult {
    let provider = adapter.provider();
    let citations = extract_citations(provider, &response.raw, &response.text);
    debug!(
        citations = citations.len(),
        tokens = response.tokens_used,
        elapsed_ms = elapsed.as_millis(),
        "provider call succeeded"
    );

    CompletionResult {
        provider,
        cost_estimate: estimate_cost(provider, &response.model, response.tokens_used),
        execution_time_ms: elapsed.as_millis() as u64,
        raw_citations: (!citations.is_empty()).then_some(citations),
        has_web_search: response.web_search_used,
        text: response.text,
        tokens_used: response.tokens_used,
        model: response.model,
    }
}
