//! Transient retry decisions
//!
//! Pure function of `(status, headers, method, has_idempotency_key, attempt)`;
//! sleeping is left to the pipeline so cancellation can interrupt it.

use std::time::Duration;

use authflow_domain::constants::MAX_TRANSIENT_RETRIES;
use authflow_domain::RetryConfig;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};

use super::headers::parse_retry_after;

/// Outcome of [`RetryScheduler::decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Resend after the given delay
    RetryAfter(Duration),
    /// Surface the response as an error
    Stop(StopReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Status is not 408, 429 or 5xx
    NotRetryable,
    /// Non-idempotent method without an idempotency key
    NotReplaySafe,
    /// Retry budget used up
    Exhausted,
    /// Server asked for a longer wait than we are willing to sleep
    RetryAfterTooLong,
}

/// Bounded exponential backoff honoring `Retry-After`.
#[derive(Debug, Clone)]
pub struct RetryScheduler {
    base_delay: Duration,
    max_retries: u32,
    max_retry_after: Duration,
}

impl Default for RetryScheduler {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryScheduler {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            base_delay: config.base_delay(),
            max_retries: config.effective_max_retries(),
            max_retry_after: Duration::from_secs(config.max_retry_after_secs),
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Replay-safe iff the method is read-only or the call carries an
    /// idempotency key.
    pub fn is_replay_safe(method: &Method, has_idempotency_key: bool) -> bool {
        has_idempotency_key || matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
    }

    pub fn is_retryable_status(status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS
            || status == StatusCode::REQUEST_TIMEOUT
            || status.is_server_error()
    }

    /// `max(retry_after, base * 2^attempt)`, where `attempt` counts retries
    /// already made.
    pub fn backoff_delay(&self, attempt: u32, retry_after_secs: Option<u64>) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let backoff = self.base_delay.saturating_mul(factor);
        let server = Duration::from_secs(retry_after_secs.unwrap_or(0));
        backoff.max(server)
    }

    pub fn decide(
        &self,
        status: StatusCode,
        headers: &HeaderMap,
        method: &Method,
        has_idempotency_key: bool,
        attempt: u32,
    ) -> RetryDecision {
        if !Self::is_retryable_status(status) {
            return RetryDecision::Stop(StopReason::NotRetryable);
        }
        if !Self::is_replay_safe(method, has_idempotency_key) {
            return RetryDecision::Stop(StopReason::NotReplaySafe);
        }
        if attempt >= self.max_retries.min(MAX_TRANSIENT_RETRIES) {
            return RetryDecision::Stop(StopReason::Exhausted);
        }

        let retry_after = parse_retry_after(headers);
        if retry_after.is_some_and(|secs| Duration::from_secs(secs) > self.max_retry_after) {
            return RetryDecision::Stop(StopReason::RetryAfterTooLong);
        }

        RetryDecision::RetryAfter(self.backoff_delay(attempt, retry_after))
    }
}
