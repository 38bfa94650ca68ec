//! Shared helpers for authflow-infra integration tests
#![allow(dead_code)]

use std::time::Duration;

use authflow_domain::ClientConfig;
use authflow_infra::ApiClient;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const REFRESH_PATH: &str = "/auth/refresh";

/// Configuration with short delays so retry tests stay fast.
pub fn fast_config(server: &MockServer) -> ClientConfig {
    let mut config = ClientConfig::with_base_url(server.uri());
    config.request_timeout_ms = 2_000;
    config.refresh.timeout_ms = 2_000;
    config.retry.base_delay_ms = 20;
    config
}

/// Client pointed at `server` with [`fast_config`].
pub fn client_for(server: &MockServer) -> ApiClient {
    authflow_infra::init_tracing(false);
    ApiClient::new(fast_config(server)).expect("client should build")
}

/// Client pointed at `server` after adjusting the fast config.
pub fn client_with(server: &MockServer, adjust: impl FnOnce(&mut ClientConfig)) -> ApiClient {
    authflow_infra::init_tracing(false);
    let mut config = fast_config(server);
    adjust(&mut config);
    ApiClient::new(config).expect("client should build")
}

/// Refresh endpoint answering with `token` after `delay`.
pub async fn mount_refresh(server: &MockServer, token: &str, delay: Duration, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "access_token": token }))
                .set_delay(delay),
        )
        .expect(expected_calls)
        .named("refresh")
        .mount(server)
        .await;
}

/// Refresh endpoint answering with a bare status.
pub async fn mount_refresh_status(server: &MockServer, status: u16, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(status))
        .expect(expected_calls)
        .named("refresh")
        .mount(server)
        .await;
}

/// Number of requests the server received for `method_name path_name`.
pub async fn hits(server: &MockServer, method_name: &str, path_name: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.method.as_str() == method_name && r.url.path() == path_name)
        .count()
}
