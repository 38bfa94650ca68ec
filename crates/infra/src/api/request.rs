//! Request descriptor for [`ApiClient`](super::ApiClient)

use std::time::Duration;

use authflow_domain::{AppError, ErrorCause, ErrorKind};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// How the idempotency header is chosen for a call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Idempotency {
    /// No header
    #[default]
    None,
    /// Mint a fresh key for this logical call
    Auto,
    /// Caller-provided key
    Key(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(serde_json::Value),
    Raw { bytes: Vec<u8>, content_type: Option<String> },
}

/// One logical API call.
///
/// Builder methods never fail; invalid header names or unserializable
/// bodies are reported as `bad_request` when the request is sent.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    headers: HeaderMap,
    body: Option<RequestBody>,
    query: Vec<(String, String)>,
    timeout: Option<Duration>,
    cancel: Option<CancellationToken>,
    idempotency: Idempotency,
    reauth_proof: Option<String>,
    skip_auth: bool,
    invalid: Option<String>,
}

impl ApiRequest {
    /// `path` is either an absolute URL or a path joined to the base URL.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: None,
            query: Vec::new(),
            timeout: None,
            cancel: None,
            idempotency: Idempotency::None,
            reauth_proof: None,
            skip_auth: false,
            invalid: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Add a header. Caller headers win over every default the pipeline
    /// would otherwise set.
    pub fn header<K, V>(mut self, key: K, value: V) -> Self
    where
        HeaderName: TryFrom<K>,
        <HeaderName as TryFrom<K>>::Error: std::fmt::Display,
        HeaderValue: TryFrom<V>,
        <HeaderValue as TryFrom<V>>::Error: std::fmt::Display,
    {
        match (HeaderName::try_from(key), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => {
                self.headers.append(name, value);
            }
            (Err(e), _) => self.record_invalid(format!("invalid header name: {e}")),
            (_, Err(e)) => self.record_invalid(format!("invalid header value: {e}")),
        }
        self
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Serialize `body` as the JSON payload.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Self {
        match serde_json::to_value(body) {
            Ok(value) => self.body = Some(RequestBody::Json(value)),
            Err(e) => self.record_invalid(format!("failed to serialize body: {e}")),
        }
        self
    }

    pub fn raw(mut self, bytes: impl Into<Vec<u8>>, content_type: Option<&str>) -> Self {
        self.body =
            Some(RequestBody::Raw { bytes: bytes.into(), content_type: content_type.map(str::to_string) });
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Per-attempt timeout, overriding the configured default.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Abort the call (any attempt or wait) when `token` fires.
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Attach a freshly minted idempotency key, making the call replay-safe.
    pub fn idempotent(mut self) -> Self {
        self.idempotency = Idempotency::Auto;
        self
    }

    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency = Idempotency::Key(key.into());
        self
    }

    /// Proof obtained from a completed step-up challenge.
    pub fn reauth_proof(mut self, proof: impl Into<String>) -> Self {
        self.reauth_proof = Some(proof.into());
        self
    }

    /// Public endpoint: no bearer header, never refreshed.
    pub fn skip_auth(mut self) -> Self {
        self.skip_auth = true;
        self
    }

    fn record_invalid(&mut self, reason: String) {
        if self.invalid.is_none() {
            self.invalid = Some(reason);
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn header_map(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> Option<&RequestBody> {
        self.body.as_ref()
    }

    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn timeout_override(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn cancellation(&self) -> Option<&CancellationToken> {
        self.cancel.as_ref()
    }

    pub fn idempotency(&self) -> &Idempotency {
        &self.idempotency
    }

    pub fn reauth_proof_value(&self) -> Option<&str> {
        self.reauth_proof.as_deref()
    }

    pub fn skips_auth(&self) -> bool {
        self.skip_auth
    }

    /// Surface any error recorded while building.
    pub(crate) fn validate(&self) -> Result<(), AppError> {
        match &self.invalid {
            Some(reason) => Err(AppError::new(ErrorKind::BadRequest)
                .with_cause(ErrorCause::InvalidRequest(reason.clone()))),
            None => Ok(()),
        }
    }
}
