//! Shared retry-with-backoff policy.
//!
//! Exponential backoff with jitter and a hard delay cap. Retryability is
//! decided by [`AppError::is_retryable`]; everything else fails fast.

use std::future::Future;
use std::time::Duration;

use rand::RngExt;
use tracing::warn;

use crate::result::AppResult;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (not counting the initial attempt).
    pub max_retries: u32,
    /// Base delay between retries. Actual delay = base * 2^attempt + jitter.
    pub base_delay: Duration,
    /// Hard cap on the computed delay to prevent unbounded growth.
    pub max_delay: Duration,
    /// When true, adds random jitter of [0, base_delay/2) to prevent
    /// thundering herd.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Policy from millisecond knobs, as carried by the store configuration.
    pub fn from_millis(max_retries: u32, base_ms: u64, cap_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_millis(cap_ms),
            jitter: true,
        }
    }

    /// Compute the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        // 2^attempt is computed with a checked shift so attempts >= 32 saturate.
        let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let exp_delay = self
            .base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay);
        let capped = exp_delay.min(self.max_delay);

        if !self.jitter {
            return capped;
        }

        // Jitter is limited so the final delay never exceeds `max_delay`.
        let jitter_range_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX) / 2;
        if jitter_range_ms == 0 {
            return capped;
        }

        let remaining_ms =
            u64::try_from(self.max_delay.saturating_sub(capped).as_millis()).unwrap_or(0);
        let jitter_limit_ms = jitter_range_ms.min(remaining_ms);
        if jitter_limit_ms == 0 {
            return capped;
        }

        let jitter_ms = rand::rng().random_range(0..jitter_limit_ms);
        (capped + Duration::from_millis(jitter_ms)).min(self.max_delay)
    }
}

/// Execute an async operation with retry-and-backoff.
///
/// The `operation` closure receives the current attempt number (0-indexed).
/// Errors for which [`AppError::is_retryable`] returns false propagate
/// immediately; retryable errors are retried until `max_retries` is
/// exhausted, then the last error propagates.
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    op_name: &str,
    operation: F,
) -> AppResult<T>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_retries => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    "{} failed (attempt {}/{}), retrying in {:?}: {}",
                    op_name,
                    attempt + 1,
                    policy.max_retries + 1,
                    delay,
                    err
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
