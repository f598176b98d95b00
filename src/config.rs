// Session configuration — transport limits and retry-policy defaults.

use std::time::Duration;

use serde::Deserialize;

/// Default number of retries allowed beyond the initial attempt.
pub const DEFAULT_MAX_RETRY_COUNT: u32 = 3;

/// Default delay in milliseconds before a retry attempt is started.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 3000;

/// Default per-attempt transport timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Maximum number of credential re-issue rounds within a single attempt.
/// Past this the challenged response is passed through as-is.
pub const MAX_CHALLENGE_ROUNDS: u32 = 5;

/// Top-level configuration for a [`Session`](crate::Session).
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Per-attempt transport timeout in seconds.
    pub timeout_secs: u64,
    /// Maximum number of retries for unsolicited cycles.
    pub max_retry_count: u32,
    /// Milliseconds to wait before a retry attempt.
    pub retry_delay_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_retry_count: DEFAULT_MAX_RETRY_COUNT,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
        }
    }
}

impl SessionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}
