//! Retry policy for transient backend failures.

use rand::Rng;
use std::time::Duration;

/// Messages that mark a database error as worth retrying. Covers both the
/// SQLite wording and the server-side pool/connection failures so the facade
/// stays backend-agnostic.
const RETRYABLE_MARKERS: &[&str] = &[
    "database is locked",
    "database table is locked",
    "database disk image is malformed",
    "connection timeout",
    "connection pool",
    "connection closed",
];

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Classify an error message as retryable.
    pub fn is_retryable(&self, error_message: &str) -> bool {
        let lower = error_message.to_lowercase();
        RETRYABLE_MARKERS.iter().any(|marker| lower.contains(marker))
    }

    /// Backoff for the given zero-based attempt: `min(base * 2^attempt, cap)`
    /// plus up to 10% jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay);
        let jitter = exp.mul_f64(rand::thread_rng().gen_range(0.0..0.1));
        exp + jitter
    }
}
