//! Error types used throughout the application
//!
//! Two error shapes exist:
//!
//! - [`AppError`] is the single outcome type of an API call. It carries a
//!   stable [`ErrorKind`] plus everything a caller needs to render the right
//!   UX (status, request id, retry hint, step-up metadata).
//! - [`AuthflowError`] covers setup failures (configuration, client
//!   construction) that happen before any request is made.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::impl_stable_code_conversions;

/// Stable error taxonomy surfaced to callers.
///
/// The string identifiers are part of the public contract and never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidCredentials,
    EmailUnverified,
    MfaRequired,
    InvalidOrExpiredToken,
    NeedStepUp,
    RateLimited,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    ServerError,
    BadRequest,
    NetworkError,
    Timeout,
    UnknownError,
}

impl_stable_code_conversions!(ErrorKind {
    InvalidCredentials => "invalid_credentials",
    EmailUnverified => "email_unverified",
    MfaRequired => "mfa_required",
    InvalidOrExpiredToken => "invalid_or_expired_token",
    NeedStepUp => "need_step_up",
    RateLimited => "rate_limited",
    Unauthorized => "unauthorized",
    Forbidden => "forbidden",
    NotFound => "not_found",
    Conflict => "conflict",
    ServerError => "server_error",
    BadRequest => "bad_request",
    NetworkError => "network_error",
    Timeout => "timeout",
    UnknownError => "unknown_error",
});

impl ErrorKind {
    /// Every kind, in declaration order.
    pub const ALL: [Self; 15] = [
        Self::InvalidCredentials,
        Self::EmailUnverified,
        Self::MfaRequired,
        Self::InvalidOrExpiredToken,
        Self::NeedStepUp,
        Self::RateLimited,
        Self::Unauthorized,
        Self::Forbidden,
        Self::NotFound,
        Self::Conflict,
        Self::ServerError,
        Self::BadRequest,
        Self::NetworkError,
        Self::Timeout,
        Self::UnknownError,
    ];

    /// Map an HTTP status to its fallback kind.
    pub fn from_status(status: u16) -> Self {
        match status {
            400 => Self::BadRequest,
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            409 => Self::Conflict,
            429 => Self::RateLimited,
            s if s >= 500 => Self::ServerError,
            _ => Self::UnknownError,
        }
    }

    /// Normalize a backend-declared code into the taxonomy.
    ///
    /// Exact identifiers (in any case, with `-` or `_`) map to themselves;
    /// a small alias table covers common backend spellings. Anything else is
    /// [`ErrorKind::UnknownError`].
    pub fn from_backend_code(code: &str) -> Self {
        if let Ok(kind) = code.parse::<Self>() {
            return kind;
        }

        let normalized = code.trim().to_ascii_lowercase().replace(['-', '.', ' '], "_");
        match normalized.as_str() {
            "invalid_password" | "bad_credentials" | "wrong_credentials" => {
                Self::InvalidCredentials
            }
            "email_not_verified" | "unverified_email" => Self::EmailUnverified,
            "mfa_needed" | "otp_required" | "two_factor_required" => Self::MfaRequired,
            "token_expired" | "invalid_token" | "expired_token" | "token_invalid" => {
                Self::InvalidOrExpiredToken
            }
            "step_up_required" | "reauth_required" | "reauthentication_required"
            | "insufficient_user_authentication" | "insufficient_authentication" => {
                Self::NeedStepUp
            }
            "too_many_requests" | "rate_limit" | "rate_limit_exceeded" | "throttled" => {
                Self::RateLimited
            }
            "unauthenticated" | "not_authenticated" => Self::Unauthorized,
            "access_denied" | "permission_denied" | "insufficient_scope" => Self::Forbidden,
            "resource_not_found" | "missing" => Self::NotFound,
            "already_exists" | "duplicate" => Self::Conflict,
            "internal_error" | "internal_server_error" | "service_unavailable" => {
                Self::ServerError
            }
            "validation_error" | "invalid_request" | "invalid_input" => Self::BadRequest,
            _ => Self::UnknownError,
        }
    }

    /// Whether the kind stems from a transport-level failure.
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::NetworkError | Self::Timeout)
    }
}

/// Step-up (reauthentication) metadata attached to `need_step_up` errors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepUpMeta {
    /// Human-oriented hint on what the user must do
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,

    /// Server challenge identifier to echo back with the proof
    #[serde(skip_serializing_if = "Option::is_none")]
    pub challenge_id: Option<String>,

    /// Challenge expiry as sent by the server
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,

    /// Requested authentication method (e.g. `totp`, `webauthn`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
}

impl StepUpMeta {
    /// True when no field is populated.
    pub fn is_empty(&self) -> bool {
        self.hint.is_none()
            && self.challenge_id.is_none()
            && self.expires_at.is_none()
            && self.method.is_none()
    }

    /// Fill unset fields from `other`, keeping values already present.
    pub fn merge_missing(&mut self, other: Self) {
        if self.hint.is_none() {
            self.hint = other.hint;
        }
        if self.challenge_id.is_none() {
            self.challenge_id = other.challenge_id;
        }
        if self.expires_at.is_none() {
            self.expires_at = other.expires_at;
        }
        if self.method.is_none() {
            self.method = other.method;
        }
    }
}

/// Underlying reason behind an [`AppError`].
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "detail", rename_all = "snake_case")]
pub enum ErrorCause {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("request cancelled by caller")]
    Cancelled,

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("failed to decode response body: {0}")]
    Decode(String),

    #[error("failed to build request: {0}")]
    InvalidRequest(String),
}

/// The single error shape returned by every API call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppError {
    pub code: ErrorKind,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    /// Server-suggested wait before retrying, in whole seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,

    /// Backend-declared human readable message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<StepUpMeta>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<ErrorCause>,
}

impl AppError {
    /// Create a bare error of the given kind.
    pub fn new(code: ErrorKind) -> Self {
        Self {
            code,
            status: None,
            request_id: None,
            retry_after: None,
            message: None,
            meta: None,
            cause: None,
        }
    }

    /// Transport timeout.
    pub fn timeout(after: Duration) -> Self {
        Self::new(ErrorKind::Timeout).with_cause(ErrorCause::Timeout(after))
    }

    /// No response at all (connection refused, DNS, reset...).
    pub fn network<S: Into<String>>(detail: S) -> Self {
        Self::new(ErrorKind::NetworkError).with_cause(ErrorCause::Transport(detail.into()))
    }

    /// Aborted through the caller's cancellation handle.
    pub fn cancelled() -> Self {
        Self::new(ErrorKind::NetworkError).with_cause(ErrorCause::Cancelled)
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn with_retry_after(mut self, seconds: Option<u64>) -> Self {
        self.retry_after = seconds;
        self
    }

    pub fn with_message<S: Into<String>>(mut self, message: S) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_meta(mut self, meta: StepUpMeta) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn with_cause(mut self, cause: ErrorCause) -> Self {
        self.cause = Some(cause);
        self
    }

    /// True if the caller must complete a step-up challenge before retrying.
    pub fn requires_step_up(&self) -> bool {
        self.code == ErrorKind::NeedStepUp
    }

    /// True if the call was aborted by the caller rather than failing.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.cause, Some(ErrorCause::Cancelled))
    }

    /// Suggested retry delay, if the server provided one.
    pub fn retry_after_duration(&self) -> Option<Duration> {
        self.retry_after.map(Duration::from_secs)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code)?;
        if let Some(status) = self.status {
            write!(f, " (status {status})")?;
        }
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        } else if let Some(cause) = &self.cause {
            write!(f, ": {cause}")?;
        }
        if let Some(request_id) = &self.request_id {
            write!(f, " [request {request_id}]")?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_ref().map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

/// Setup-time errors for authflow components
#[derive(Error, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum AuthflowError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for setup operations
pub type Result<T> = std::result::Result<T, AuthflowError>;
