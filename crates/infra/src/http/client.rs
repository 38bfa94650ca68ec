use std::time::Duration;

use authflow_common::cancellation::{AbortReason, CallSignal};
use authflow_domain::{AppError, AuthflowError, ErrorCause, ErrorKind};
use reqwest::header::HeaderMap;
use reqwest::{Client as ReqwestClient, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

/// Failure of a single HTTP exchange, before any status is evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("request cancelled")]
    Cancelled,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("failed to read response body: {0}")]
    Body(String),

    #[error("invalid request: {0}")]
    Build(String),
}

impl From<TransportError> for AppError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout(after) => AppError::timeout(after),
            TransportError::Cancelled => AppError::cancelled(),
            TransportError::Connect(detail) | TransportError::Body(detail) => {
                AppError::network(detail)
            }
            TransportError::Build(detail) => AppError::new(ErrorKind::BadRequest)
                .with_cause(ErrorCause::InvalidRequest(detail)),
        }
    }
}

/// A response whose body has been fully read.
#[derive(Debug, Clone)]
pub struct BufferedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl BufferedResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Header value as a trimmed string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok()).map(str::trim)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Deserialize the body as JSON.
    ///
    /// 204/205 responses and empty bodies deserialize from `null`, so `()`
    /// and `Option<T>` targets work without a payload.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        let no_content =
            self.status == StatusCode::NO_CONTENT || self.status == StatusCode::RESET_CONTENT;
        if no_content || self.body.iter().all(u8::is_ascii_whitespace) {
            serde_json::from_value(serde_json::Value::Null)
        } else {
            serde_json::from_slice(&self.body)
        }
    }
}

/// Thin wrapper over `reqwest` that never retries on its own.
///
/// Cookies are kept in a client-wide store and sent with every request,
/// which the cookie-authenticated refresh endpoint relies on.
#[derive(Clone, Debug)]
pub struct HttpClient {
    client: ReqwestClient,
}

impl HttpClient {
    /// Start building a new HTTP client.
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::default()
    }

    /// Convenience constructor with default configuration.
    pub fn new() -> Result<Self, AuthflowError> {
        Self::builder().build()
    }

    /// Create a request builder using the underlying reqwest client.
    pub fn request<U>(&self, method: Method, url: U) -> RequestBuilder
    where
        U: reqwest::IntoUrl,
    {
        self.client.request(method, url)
    }

    /// Send one request and buffer its body, aborting when `signal` fires.
    ///
    /// Exactly one network attempt is made.
    pub async fn execute(
        &self,
        builder: RequestBuilder,
        signal: &CallSignal,
    ) -> Result<BufferedResponse, TransportError> {
        let request = builder.build().map_err(|err| TransportError::Build(err.to_string()))?;
        let method = request.method().clone();
        let url = request.url().clone();
        debug!(%method, %url, "sending HTTP request");

        let exchange = async {
            let response = self.client.execute(request).await.map_err(map_reqwest_error)?;
            let status = response.status();
            let headers = response.headers().clone();
            let body = response.bytes().await.map_err(|err| TransportError::Body(err.to_string()))?;
            Ok(BufferedResponse { status, headers, body: body.to_vec() })
        };

        match signal.guard(exchange).await {
            Ok(Ok(response)) => {
                debug!(%method, %url, status = %response.status, "received HTTP response");
                Ok(response)
            }
            Ok(Err(err)) => {
                debug!(%method, %url, error = %err, "HTTP request failed");
                Err(err)
            }
            Err(AbortReason::Cancelled) => {
                debug!(%method, %url, "HTTP request cancelled");
                Err(TransportError::Cancelled)
            }
            Err(AbortReason::TimedOut(after)) => {
                debug!(%method, %url, ?after, "HTTP request timed out");
                Err(TransportError::Timeout(after))
            }
        }
    }
}

/// Builder for [`HttpClient`].
#[derive(Debug)]
pub struct HttpClientBuilder {
    connect_timeout: Duration,
    user_agent: Option<String>,
    default_headers: Option<HeaderMap>,
    cookie_store: bool,
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            user_agent: None,
            default_headers: None,
            cookie_store: true,
        }
    }
}

impl HttpClientBuilder {
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    pub fn default_headers(mut self, headers: HeaderMap) -> Self {
        self.default_headers = Some(headers);
        self
    }

    /// Keep and resend cookies (enabled by default).
    pub fn cookie_store(mut self, enabled: bool) -> Self {
        self.cookie_store = enabled;
        self
    }

    pub fn build(self) -> Result<HttpClient, AuthflowError> {
        let mut builder = ReqwestClient::builder()
            .connect_timeout(self.connect_timeout)
            .cookie_store(self.cookie_store)
            .no_proxy();

        if let Some(agent) = self.user_agent {
            builder = builder.user_agent(agent);
        }

        if let Some(headers) = self.default_headers {
            builder = builder.default_headers(headers);
        }

        let client = builder
            .build()
            .map_err(|err| AuthflowError::Config(format!("failed to build HTTP client: {err}")))?;

        Ok(HttpClient { client })
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_builder() {
        TransportError::Build(err.to_string())
    } else if err.is_body() || err.is_decode() {
        TransportError::Body(err.to_string())
    } else {
        TransportError::Connect(err.to_string())
    }
}
