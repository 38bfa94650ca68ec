//! Per-call request state machine
//!
//! ```text
//! COMPOSE -> SEND -> EVALUATE -> SUCCESS
//!                             -> STEP_UP          (terminal, never refreshed)
//!                             -> REFRESH_RETRY    (once, back to COMPOSE)
//!                             -> TRANSIENT_RETRY  (at most twice, back to COMPOSE)
//!                             -> TERMINAL_ERROR
//! ```
//!
//! Each SEND runs under the caller's cancellation token plus a fresh
//! per-attempt deadline. Waiting on the shared refresh or a backoff delay
//! only observes the caller's token.

use std::time::Duration;

use authflow_common::cancellation::{AbortReason, CallSignal};
use authflow_common::{idempotency, AccessToken, TokenStore};
use authflow_domain::{AppError, ClientConfig, ErrorCause, ErrorKind};
use reqwest::StatusCode;
use tracing::{debug, warn};

use super::classifier::classify;
use super::headers::{compose_headers, resolve_url};
use super::refresh::RefreshGate;
use super::request::{ApiRequest, Idempotency, RequestBody};
use super::retry::{RetryDecision, RetryScheduler, StopReason};
use crate::http::{BufferedResponse, HttpClient};

/// Retry counters for one logical call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Attempts {
    pub auth: u32,
    pub transient: u32,
}

/// What EVALUATE decided for one response.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Success,
    StepUp(AppError),
    /// Refresh, then resend once; the error is surfaced if refresh fails
    RefreshRetry(AppError),
    TransientRetry { delay: Duration, error: AppError },
    Terminal(AppError),
}

/// Decide the next state for a received response.
pub fn evaluate(
    response: &BufferedResponse,
    request: &ApiRequest,
    has_idempotency_key: bool,
    attempts: Attempts,
    retry: &RetryScheduler,
) -> Transition {
    if response.is_success() {
        return Transition::Success;
    }

    let error = classify(response.status.as_u16(), &response.headers, &response.body);
    if error.requires_step_up() {
        return Transition::StepUp(error);
    }

    let replay_safe = RetryScheduler::is_replay_safe(request.method(), has_idempotency_key);
    if response.status == StatusCode::UNAUTHORIZED
        && !request.skips_auth()
        && request.reauth_proof_value().is_none()
        && replay_safe
        && attempts.auth == 0
    {
        return Transition::RefreshRetry(error);
    }

    match retry.decide(
        response.status,
        &response.headers,
        request.method(),
        has_idempotency_key,
        attempts.transient,
    ) {
        RetryDecision::RetryAfter(delay) => Transition::TransientRetry { delay, error },
        RetryDecision::Stop(StopReason::Exhausted) => {
            warn!(status = %response.status, attempts = attempts.transient, "transient retries exhausted");
            Transition::Terminal(error)
        }
        RetryDecision::Stop(reason) => {
            debug!(status = %response.status, ?reason, "not retrying");
            Transition::Terminal(error)
        }
    }
}

/// Resolve the idempotency key once per logical call.
fn resolve_idempotency_key(idempotency: &Idempotency) -> Result<Option<String>, AppError> {
    match idempotency {
        Idempotency::None => Ok(None),
        Idempotency::Auto => Ok(Some(idempotency::new_key())),
        Idempotency::Key(key) if idempotency::is_valid(key) => Ok(Some(key.clone())),
        Idempotency::Key(_) => Err(AppError::new(ErrorKind::BadRequest).with_cause(
            ErrorCause::InvalidRequest("idempotency key must be 8-128 chars of [A-Za-z0-9_-]".into()),
        )),
    }
}

/// True when the store holds a different credential than the one an attempt
/// was sent with, meaning another caller already refreshed it.
fn token_rotated(sent: Option<&AccessToken>, current: Option<&AccessToken>) -> bool {
    matches!(current, Some(current) if sent != Some(current))
}

fn aborted(reason: AbortReason) -> AppError {
    match reason {
        AbortReason::Cancelled => AppError::cancelled(),
        AbortReason::TimedOut(after) => AppError::timeout(after),
    }
}

/// Collaborators borrowed from the owning client for one call.
pub(crate) struct Pipeline<'a> {
    pub http: &'a HttpClient,
    pub config: &'a ClientConfig,
    pub store: &'a TokenStore,
    pub gate: &'a RefreshGate,
    pub retry: &'a RetryScheduler,
}

impl Pipeline<'_> {
    pub(crate) async fn execute(&self, request: &ApiRequest) -> Result<BufferedResponse, AppError> {
        request.validate()?;
        let key = resolve_idempotency_key(request.idempotency())?;
        let url = resolve_url(&self.config.base_url, request.path());
        let timeout = request.timeout_override().unwrap_or_else(|| self.config.request_timeout());
        let call = CallSignal::new(request.cancellation(), None);
        let mut attempts = Attempts::default();

        loop {
            let token = if request.skips_auth() { None } else { self.store.get() };
            let headers = compose_headers(request, token.as_ref(), key.as_deref())?;

            let mut builder = self.http.request(request.method().clone(), &url).headers(headers);
            if !request.query_pairs().is_empty() {
                builder = builder.query(request.query_pairs());
            }
            builder = match request.body() {
                Some(RequestBody::Json(value)) => builder.json(value),
                Some(RequestBody::Raw { bytes, .. }) => builder.body(bytes.clone()),
                None => builder,
            };

            let response = self.http.execute(builder, &call.rearm(Some(timeout))).await?;

            match evaluate(&response, request, key.is_some(), attempts, self.retry) {
                Transition::Success => return Ok(response),
                Transition::StepUp(error) => {
                    debug!(status = %response.status, "step-up authentication required");
                    return Err(error);
                }
                Transition::Terminal(error) => return Err(error),
                Transition::RefreshRetry(error) => {
                    attempts.auth += 1;
                    if token_rotated(token.as_ref(), self.store.get().as_ref()) {
                        debug!("access token replaced while in flight; resending without refresh");
                        continue;
                    }
                    debug!("access token rejected; refreshing");
                    let outcome = call.guard_external(self.gate.refresh()).await.map_err(aborted)?;
                    if !outcome.is_success() {
                        debug!(?outcome, "refresh did not succeed; surfacing original error");
                        return Err(error);
                    }
                }
                Transition::TransientRetry { delay, error } => {
                    debug!(
                        status = %response.status,
                        attempt = attempts.transient + 1,
                        delay_ms = delay.as_millis() as u64,
                        code = %error.code,
                        "retrying transient failure"
                    );
                    attempts.transient += 1;
                    call.sleep(delay).await.map_err(aborted)?;
                }
            }
        }
    }
}
