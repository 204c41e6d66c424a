//! Per-provider sliding-window rate limiting.
//!
//! Each provider gets a requests-per-minute ceiling and a window of the
//! instants at which calls were admitted during the trailing 60 seconds. A
//! caller that would push the window past its ceiling sleeps until the oldest
//! admission has left the window.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use citetrack_core::completion::RateLimiter;
//! use citetrack_core::provider::Provider;
//!
//! # async fn example() {
//! let limiter = Arc::new(RateLimiter::with_default_ceilings().with_ceiling(Provider::Gemini, 10));
//!
//! let waited = limiter.admit(Provider::Gemini).await;
//! assert!(waited.is_zero());
//! # }
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::provider::Provider;

use super::constants::{
    ADMISSION_MARGIN, CUMULATIVE_WAIT_WARNING_THRESHOLD, DEFAULT_REQUESTS_PER_MINUTE, RATE_WINDOW,
};

/// Sliding-window rate limiter keyed by provider.
///
/// Designed to be wrapped in `Arc` and shared across tasks. `DashMap` holds
/// per-provider state; the per-provider `tokio::sync::Mutex` is held across
/// the wait so two callers can never both see room in the same window.
#[derive(Debug)]
pub struct RateLimiter {
    /// Ceiling for providers without an explicit one.
    default_ceiling: u32,

    /// Explicit per-provider ceilings. Fixed once the limiter is shared.
    ceilings: HashMap<Provider, u32>,

    /// Per-provider windows. The `Arc` lets callers release the shard lock
    /// before awaiting the inner mutex.
    windows: DashMap<Provider, Arc<ProviderWindow>>,
}

#[derive(Debug)]
struct ProviderWindow {
    /// Admission instants within the trailing window, oldest first.
    admissions: Mutex<VecDeque<Instant>>,

    /// Total time callers have waited on this provider (in milliseconds).
    cumulative_wait_ms: AtomicU64,
}

impl ProviderWindow {
    fn new() -> Self {
        Self {
            admissions: Mutex::new(VecDeque::new()),
            cumulative_wait_ms: AtomicU64::new(0),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn add_cumulative_wait(&self, wait: Duration) -> Duration {
        let wait_ms = wait.as_millis() as u64;
        let total = self.cumulative_wait_ms.fetch_add(wait_ms, Ordering::SeqCst) + wait_ms;
        Duration::from_millis(total)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_REQUESTS_PER_MINUTE)
    }
}

impl RateLimiter {
    /// Creates a limiter where every provider uses `default_ceiling`.
    ///
    /// A ceiling of zero would never admit anything and is raised to one;
    /// configuration rejects it before it gets here.
    #[must_use]
    #[instrument]
    pub fn new(default_ceiling: u32) -> Self {
        debug!("creating rate limiter");
        Self {
            default_ceiling: default_ceiling.max(1),
            ceilings: HashMap::new(),
            windows: DashMap::new(),
        }
    }

    /// Creates a limiter preloaded with each provider's documented ceiling.
    #[must_use]
    pub fn with_default_ceilings() -> Self {
        Provider::ALL
            .into_iter()
            .fold(Self::default(), |limiter, provider| {
                limiter.with_ceiling(provider, provider.default_requests_per_minute())
            })
    }

    /// Sets the requests-per-minute ceiling for one provider.
    #[must_use]
    pub fn with_ceiling(mut self, provider: Provider, requests_per_minute: u32) -> Self {
        self.ceilings.insert(provider, requests_per_minute.max(1));
        self
    }

    /// Returns the ceiling that applies to `provider`.
    #[must_use]
    pub fn ceiling(&self, provider: Provider) -> u32 {
        self.ceilings
            .get(&provider)
            .copied()
            .unwrap_or(self.default_ceiling)
    }

    /// Waits until `provider` has room in its window, then records an admission.
    ///
    /// Returns how long the caller waited. Never fails. If the returned future
    /// is dropped mid-wait, nothing is recorded; admissions already recorded
    /// are never removed early.
    #[instrument(skip(self), fields(provider = %provider))]
    pub async fn admit(&self, provider: Provider) -> Duration {
        let ceiling = self.ceiling(provider) as usize;

        // Clone the Arc so the DashMap shard lock is released before awaiting.
        let window = self
            .windows
            .entry(provider)
            .or_insert_with(|| Arc::new(ProviderWindow::new()))
            .clone();

        let mut admissions = window.admissions.lock().await;
        let now = Instant::now();
        prune(&mut admissions, now);

        let mut waited = Duration::ZERO;
        if admissions.len() >= ceiling
            && let Some(&oldest) = admissions.front()
        {
            waited = (RATE_WINDOW + ADMISSION_MARGIN).saturating_sub(now.duration_since(oldest));
            let cumulative = window.add_cumulative_wait(waited);

            debug!(
                wait_ms = waited.as_millis(),
                in_window = admissions.len(),
                ceiling,
                "window full, waiting for oldest admission to expire"
            );
            if cumulative >= CUMULATIVE_WAIT_WARNING_THRESHOLD {
                warn!(
                    cumulative_wait_secs = cumulative.as_secs(),
                    "excessive rate limiting - consider raising the plan tier or lowering volume"
                );
            }

            tokio::time::sleep(waited).await;
            prune(&mut admissions, Instant::now());
        }

        admissions.push_back(Instant::now());
        waited
    }

    /// Number of admissions currently inside `provider`'s window.
    pub async fn window_len(&self, provider: Provider) -> usize {
        let Some(window) = self.windows.get(&provider).map(|entry| Arc::clone(entry.value()))
        else {
            return 0;
        };
        let mut admissions = window.admissions.lock().await;
        prune(&mut admissions, Instant::now());
        admissions.len()
    }
}

/// Drops admissions that are a full window old or older.
fn prune(admissions: &mut VecDeque<Instant>, now: Instant) {
    while admissions
        .front()
        .is_some_and(|&admitted| now.duration_since(admitted) >= RATE_WINDOW)
    {
        admissions.pop_front();
    }
}
