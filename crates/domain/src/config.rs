//! Client configuration structures
//!
//! Plain data only. Loading from the environment or from files lives in
//! `authflow-infra::config`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_MAX_RETRY_AFTER_SECS, DEFAULT_REFRESH_PATH, DEFAULT_REFRESH_TIMEOUT_MS,
    DEFAULT_REQUEST_TIMEOUT_MS, DEFAULT_RETRY_BASE_DELAY_MS, MAX_TRANSIENT_RETRIES,
};

/// Top-level configuration for the authenticated API client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL that relative request paths are joined against
    pub base_url: String,

    /// Per-attempt timeout applied when a request does not set its own
    pub request_timeout_ms: u64,

    /// Optional `User-Agent` header value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,

    pub refresh: RefreshConfig,

    pub retry: RetryConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            user_agent: None,
            refresh: RefreshConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Configuration pointing at `base_url` with defaults elsewhere.
    pub fn with_base_url<S: Into<String>>(base_url: S) -> Self {
        Self { base_url: base_url.into(), ..Self::default() }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Token refresh endpoint settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Path (or absolute URL) of the cookie-authenticated refresh endpoint
    pub path: String,

    /// Timeout for a single refresh call
    pub timeout_ms: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self { path: DEFAULT_REFRESH_PATH.to_string(), timeout_ms: DEFAULT_REFRESH_TIMEOUT_MS }
    }
}

impl RefreshConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Transient retry settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Base of the exponential backoff (`base * 2^attempt`)
    pub base_delay_ms: u64,

    /// Retries after the first attempt; never more than
    /// [`MAX_TRANSIENT_RETRIES`]
    pub max_retries: u32,

    /// Longest server-requested wait honoured locally
    pub max_retry_after_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            max_retries: MAX_TRANSIENT_RETRIES,
            max_retry_after_secs: DEFAULT_MAX_RETRY_AFTER_SECS,
        }
    }
}

impl RetryConfig {
    /// Retry count clamped to the hard bound.
    pub fn effective_max_retries(&self) -> u32 {
        self.max_retries.min(MAX_TRANSIENT_RETRIES)
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}
