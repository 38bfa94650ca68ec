//! Single-flight access token refresh
//!
//! The first caller starts a refresh as a spawned task; everyone arriving
//! while it runs awaits the same [`Shared`] outcome. The task owns the
//! network call, so a waiter dropping out never aborts it. When the task
//! settles it clears the slot (only if the slot still holds its own
//! generation), letting a later, independent 401 start a new refresh.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use authflow_common::cancellation::CallSignal;
use authflow_common::{AccessToken, TokenStore};
use authflow_domain::constants::{CACHE_NO_STORE, CONTENT_TYPE_JSON};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::http::HttpClient;

const TOKEN_FIELDS: &[&str] = &["access_token", "accessToken", "token"];

/// Result of one refresh, shared by every caller that awaited it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A new token was installed
    Refreshed(AccessToken),
    /// The endpoint succeeded without returning a token; the existing one is
    /// kept (cookie-only backends)
    Retained,
    /// The refresh credential was rejected (401/403); the token was cleared
    Rejected { status: u16 },
    /// Timeout, network error or unexpected status; the token is untouched
    Failed { reason: String },
}

impl RefreshOutcome {
    /// Whether the original request should be resent.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Refreshed(_) | Self::Retained)
    }
}

struct InFlight {
    generation: u64,
    outcome: Shared<BoxFuture<'static, RefreshOutcome>>,
}

struct GateInner {
    http: HttpClient,
    url: String,
    timeout: Duration,
    store: TokenStore,
    slot: Mutex<Option<InFlight>>,
    generation: AtomicU64,
    network_calls: AtomicU64,
}

/// Coordinates token refreshes so that at most one is in flight.
#[derive(Clone)]
pub struct RefreshGate {
    inner: Arc<GateInner>,
}

impl std::fmt::Debug for RefreshGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshGate")
            .field("url", &self.inner.url)
            .field("timeout", &self.inner.timeout)
            .field("in_flight", &self.is_in_flight())
            .field("refresh_count", &self.refresh_count())
            .finish()
    }
}

impl RefreshGate {
    /// `url` is the absolute refresh endpoint.
    pub fn new(http: HttpClient, url: impl Into<String>, timeout: Duration, store: TokenStore) -> Self {
        Self {
            inner: Arc::new(GateInner {
                http,
                url: url.into(),
                timeout,
                store,
                slot: Mutex::new(None),
                generation: AtomicU64::new(0),
                network_calls: AtomicU64::new(0),
            }),
        }
    }

    /// Refresh the token, joining an in-flight refresh if there is one.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn refresh(&self) -> RefreshOutcome {
        let outcome = {
            let mut slot = self.inner.slot.lock();
            match slot.as_ref() {
                Some(in_flight) => {
                    debug!(generation = in_flight.generation, "joining in-flight token refresh");
                    in_flight.outcome.clone()
                }
                None => {
                    let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
                    let outcome = self.start(generation);
                    *slot = Some(InFlight { generation, outcome: outcome.clone() });
                    outcome
                }
            }
        };
        outcome.await
    }

    fn start(&self, generation: u64) -> Shared<BoxFuture<'static, RefreshOutcome>> {
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let outcome = inner.run().await;
            inner.settle(generation);
            outcome
        });

        async move {
            task.await.unwrap_or_else(|err| RefreshOutcome::Failed {
                reason: format!("refresh task did not complete: {err}"),
            })
        }
        .boxed()
        .shared()
    }

    /// Number of refresh requests sent so far.
    pub fn refresh_count(&self) -> u64 {
        self.inner.network_calls.load(Ordering::SeqCst)
    }

    pub fn is_in_flight(&self) -> bool {
        self.inner.slot.lock().is_some()
    }
}

impl GateInner {
    fn settle(&self, generation: u64) {
        let mut slot = self.slot.lock();
        if slot.as_ref().is_some_and(|in_flight| in_flight.generation == generation) {
            *slot = None;
        }
    }

    async fn run(&self) -> RefreshOutcome {
        self.network_calls.fetch_add(1, Ordering::SeqCst);
        debug!(url = %self.url, "refreshing access token");

        let builder = self
            .http
            .request(Method::POST, &self.url)
            .header(CACHE_CONTROL, CACHE_NO_STORE)
            .header(ACCEPT, CONTENT_TYPE_JSON);
        let signal = CallSignal::new(None, Some(self.timeout));

        let response = match self.http.execute(builder, &signal).await {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, "token refresh failed; keeping current token");
                return RefreshOutcome::Failed { reason: err.to_string() };
            }
        };

        let status = response.status;
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            warn!(%status, "refresh credential rejected; clearing token");
            self.store.set(None);
            return RefreshOutcome::Rejected { status: status.as_u16() };
        }
        if !status.is_success() {
            warn!(%status, "token refresh returned an error status; keeping current token");
            return RefreshOutcome::Failed { reason: format!("refresh endpoint returned {status}") };
        }

        match extract_token(&response.body) {
            Some(token) => {
                self.store.set(Some(token.clone()));
                info!("access token refreshed");
                RefreshOutcome::Refreshed(token)
            }
            None => {
                debug!(%status, "refresh returned no token; keeping current token");
                RefreshOutcome::Retained
            }
        }
    }
}

/// Pull the new token out of any accepted response shape.
pub fn extract_token(body: &[u8]) -> Option<AccessToken> {
    let value: Value = serde_json::from_slice(body).ok()?;
    let from = |object: &Value| {
        TOKEN_FIELDS
            .iter()
            .find_map(|field| object.get(*field).and_then(Value::as_str))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(AccessToken::from)
    };
    from(&value).or_else(|| value.get("data").and_then(from))
}
