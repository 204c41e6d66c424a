//! Constants for rate limiting and retry.

use std::time::Duration;

/// Length of the sliding admission window.
pub const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Extra wait past the window edge so the oldest admission has surely expired.
pub const ADMISSION_MARGIN: Duration = Duration::from_secs(1);

/// Ceiling used for providers without an explicit one.
pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 50;

/// Default attempts per call, including the first.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Wait after a rate-limit error that carried no retry hint.
pub const DEFAULT_RATE_LIMIT_DELAY: Duration = Duration::from_secs(60);

/// Upper bound of random jitter added to rate-limit waits.
pub const DEFAULT_MAX_JITTER: Duration = Duration::from_millis(250);

/// Warning threshold for cumulative admission wait per provider (5 minutes).
pub const CUMULATIVE_WAIT_WARNING_THRESHOLD: Duration = Duration::from_secs(300);
