//! Authenticated API client
//!
//! Wraps [`HttpClient`] with bearer injection, silent single-flight refresh,
//! step-up detection and bounded transient retry. Every failure, including
//! transport failures, comes back as an [`AppError`].

use std::sync::Arc;

use authflow_common::auth::NoopSignal;
use authflow_common::{CrossContextSignal, TokenStore};
use authflow_domain::{AppError, AuthflowError, ClientConfig, ErrorCause, ErrorKind};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, instrument};

use super::headers::resolve_url;
use super::pipeline::Pipeline;
use super::refresh::RefreshGate;
use super::request::ApiRequest;
use super::retry::RetryScheduler;
use crate::http::{BufferedResponse, HttpClient};

/// Buffered response returned by [`ApiClient::send`].
pub type ApiResponse = BufferedResponse;

/// API client shared by every caller of a backend.
///
/// Cloning is cheap; clones share the token store, the refresh gate and the
/// cookie jar.
#[derive(Clone, Debug)]
pub struct ApiClient {
    http: HttpClient,
    config: Arc<ClientConfig>,
    store: TokenStore,
    gate: RefreshGate,
    retry: RetryScheduler,
}

impl ApiClient {
    /// Create a client with an in-memory token store.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(config: ClientConfig) -> Result<Self, AuthflowError> {
        Self::builder().config(config).build()
    }

    /// Create a builder for fluent configuration
    pub fn builder() -> ApiClientBuilder {
        ApiClientBuilder::default()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Token store consulted before every attempt.
    pub fn token_store(&self) -> &TokenStore {
        &self.store
    }

    pub fn refresh_gate(&self) -> &RefreshGate {
        &self.gate
    }

    /// Run `request` through the pipeline and return the buffered success
    /// response.
    ///
    /// # Errors
    ///
    /// Returns the classified [`AppError`] for non-2xx responses that were
    /// not recovered, and `timeout` / `network_error` for transport failures
    #[instrument(skip(self, request), fields(method = %request.method(), path = %request.path()))]
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, AppError> {
        let pipeline = Pipeline {
            http: &self.http,
            config: &self.config,
            store: &self.store,
            gate: &self.gate,
            retry: &self.retry,
        };
        let response = pipeline.execute(&request).await?;
        debug!(status = %response.status, "request succeeded");
        Ok(response)
    }

    /// Like [`send`](Self::send), decoding the body as JSON.
    ///
    /// 204/205 and empty bodies decode from `null`. A body that does not
    /// match `T` is reported as `unknown_error` with a decode cause.
    pub async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, AppError> {
        let response = self.send(request).await?;
        response.json().map_err(|err| {
            AppError::new(ErrorKind::UnknownError)
                .with_status(response.status.as_u16())
                .with_request_id(super::headers::request_id(&response.headers))
                .with_cause(ErrorCause::Decode(err.to_string()))
        })
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, AppError> {
        self.send_json(ApiRequest::get(path)).await
    }

    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, AppError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send_json(ApiRequest::post(path).json(body)).await
    }

    pub async fn put<B, T>(&self, path: &str, body: &B) -> Result<T, AppError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send_json(ApiRequest::put(path).json(body)).await
    }

    pub async fn patch<B, T>(&self, path: &str, body: &B) -> Result<T, AppError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send_json(ApiRequest::patch(path).json(body)).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, AppError> {
        self.send_json(ApiRequest::delete(path)).await
    }
}

/// Builder for ApiClient
#[derive(Default)]
pub struct ApiClientBuilder {
    config: Option<ClientConfig>,
    store: Option<TokenStore>,
    signal: Option<Arc<dyn CrossContextSignal>>,
    http: Option<HttpClient>,
}

impl ApiClientBuilder {
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config.get_or_insert_with(ClientConfig::default).base_url = base_url.into();
        self
    }

    /// Share an existing token store. Takes precedence over [`signal`](Self::signal).
    pub fn token_store(mut self, store: TokenStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Cross-context transport for a store created by the builder.
    pub fn signal(mut self, signal: Arc<dyn CrossContextSignal>) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Use a preconfigured HTTP client instead of building one from the
    /// config.
    pub fn http_client(mut self, http: HttpClient) -> Self {
        self.http = Some(http);
        self
    }

    /// Build the client
    ///
    /// # Errors
    ///
    /// Returns error if no base URL is configured or the HTTP client cannot
    /// be built
    pub fn build(self) -> Result<ApiClient, AuthflowError> {
        let config = self.config.unwrap_or_default();
        if config.base_url.trim().is_empty() {
            return Err(AuthflowError::Config("base_url is required".to_string()));
        }

        let http = match self.http {
            Some(http) => http,
            None => {
                let mut builder = HttpClient::builder();
                if let Some(agent) = &config.user_agent {
                    builder = builder.user_agent(agent.clone());
                }
                builder.build()?
            }
        };

        let store = self.store.unwrap_or_else(|| {
            TokenStore::new(self.signal.unwrap_or_else(|| Arc::new(NoopSignal)))
        });
        let gate = RefreshGate::new(
            http.clone(),
            resolve_url(&config.base_url, &config.refresh.path),
            config.refresh.timeout(),
            store.clone(),
        );
        let retry = RetryScheduler::from_config(&config.retry);

        Ok(ApiClient { http, config: Arc::new(config), store, gate, retry })
    }
}
