//! Integration tests for silent token refresh
//!
//! Covers single-flight coordination across concurrent callers and the
//! effect of each refresh outcome on the stored token.

mod support;

use std::sync::Arc;
use std::time::Duration;

use authflow_common::auth::SharedOrigin;
use authflow_common::TokenStore;
use authflow_domain::ErrorKind;
use authflow_infra::api::{ApiClient, ApiRequest, RefreshOutcome};
use support::{client_for, client_with, fast_config, hits, mount_refresh, mount_refresh_status, REFRESH_PATH};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_protected(server: &MockServer, route: &str, fresh_token: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .and(header("authorization", format!("Bearer {fresh_token}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "route": route })))
        .with_priority(1)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(401))
        .with_priority(2)
        .mount(server)
        .await;
}

/// Validates that concurrent 401s share one refresh call.
///
/// Assertions:
/// - Exactly one POST reaches the refresh endpoint
/// - Every caller succeeds after retrying with the refreshed bearer
/// - Each protected route is hit twice per caller (401, then 200)
#[tokio::test]
async fn test_concurrent_unauthorized_calls_share_one_refresh() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_protected(&server, "/items", "fresh").await;
    mount_refresh(&server, "fresh", Duration::from_millis(300), 1).await;

    let client = client_for(&server);
    client.token_store().set(Some("stale".into()));

    let calls = (0..5).map(|_| client.get::<serde_json::Value>("/items"));
    let results = futures::future::join_all(calls).await;

    for result in results {
        assert_eq!(result?["route"], "/items");
    }
    assert_eq!(client.refresh_gate().refresh_count(), 1);
    assert_eq!(hits(&server, "POST", REFRESH_PATH).await, 1);
    assert_eq!(hits(&server, "GET", "/items").await, 10);
    assert_eq!(client.token_store().get().unwrap().expose(), "fresh");
    Ok(())
}

/// Validates that a refresh rejected with 401 clears the token and
/// broadcasts logout to sibling contexts.
///
/// Assertions:
/// - The original call surfaces `unauthorized`
/// - The local store is empty
/// - A second context on the same origin observes the logout
#[tokio::test]
async fn test_refresh_rejection_clears_token_and_logs_out_siblings() {
    let server = MockServer::start().await;
    mount_protected(&server, "/items", "never").await;
    mount_refresh_status(&server, 401, 1).await;

    let origin = SharedOrigin::new();
    let sibling = TokenStore::new(Arc::new(origin.context()));
    sibling.set(Some("sibling-token".into()));
    assert!(sibling.bind());

    let client = ApiClient::builder()
        .config(fast_config(&server))
        .signal(Arc::new(origin.context()))
        .build()
        .unwrap();
    client.token_store().set(Some("stale".into()));

    let err = client.get::<serde_json::Value>("/items").await.unwrap_err();
    assert_eq!(err.code, ErrorKind::Unauthorized);
    assert_eq!(err.status, Some(401));
    assert!(client.token_store().get().is_none());

    let observed = sibling.wait_for(|token| token.is_none(), Some(Duration::from_secs(2)), None).await;
    assert_eq!(observed, Ok(None));
}

/// Validates that a 403 from the refresh endpoint also clears the token.
///
/// Assertions:
/// - The gate reports `Rejected { status: 403 }`
/// - The store is emptied
#[tokio::test]
async fn test_refresh_forbidden_clears_token() {
    let server = MockServer::start().await;
    mount_refresh_status(&server, 403, 1).await;

    let client = client_for(&server);
    client.token_store().set(Some("stale".into()));

    let outcome = client.refresh_gate().refresh().await;
    assert_eq!(outcome, RefreshOutcome::Rejected { status: 403 });
    assert!(client.token_store().get().is_none());
}

/// Validates that a 500 from the refresh endpoint keeps the token.
///
/// Assertions:
/// - The original call surfaces the original 401 as `unauthorized`
/// - The previously stored token is unchanged
#[tokio::test]
async fn test_refresh_server_error_keeps_token() {
    let server = MockServer::start().await;
    mount_protected(&server, "/items", "never").await;
    mount_refresh_status(&server, 500, 1).await;

    let client = client_for(&server);
    client.token_store().set(Some("stale".into()));

    let err = client.get::<serde_json::Value>("/items").await.unwrap_err();
    assert_eq!(err.code, ErrorKind::Unauthorized);
    assert_eq!(client.token_store().get().unwrap().expose(), "stale");
}

/// Validates that a refresh timing out keeps the token.
///
/// Assertions:
/// - The gate reports `Failed`
/// - The previously stored token is unchanged
#[tokio::test]
async fn test_refresh_timeout_keeps_token() {
    let server = MockServer::start().await;
    mount_refresh(&server, "late", Duration::from_secs(3), 1).await;

    let client = client_with(&server, |config| config.refresh.timeout_ms = 100);
    client.token_store().set(Some("stale".into()));

    let outcome = client.refresh_gate().refresh().await;
    assert!(matches!(outcome, RefreshOutcome::Failed { .. }), "got {outcome:?}");
    assert_eq!(client.token_store().get().unwrap().expose(), "stale");
}

/// Validates that a call is refreshed at most once.
///
/// Assertions:
/// - A 401 after a successful refresh surfaces `unauthorized`
/// - Exactly one refresh and two protected attempts happen
#[tokio::test]
async fn test_second_unauthorized_is_terminal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;
    mount_refresh(&server, "fresh", Duration::ZERO, 1).await;

    let client = client_for(&server);
    client.token_store().set(Some("stale".into()));

    let err = client.get::<serde_json::Value>("/items").await.unwrap_err();
    assert_eq!(err.code, ErrorKind::Unauthorized);
    assert_eq!(client.refresh_gate().refresh_count(), 1);
}

/// Validates that an unkeyed POST is never refreshed and replayed.
///
/// Assertions:
/// - The 401 surfaces immediately
/// - The refresh endpoint is never called
#[tokio::test]
async fn test_unkeyed_post_is_not_refreshed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/orders"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    mount_refresh(&server, "fresh", Duration::ZERO, 0).await;

    let client = client_for(&server);
    client.token_store().set(Some("stale".into()));

    let err = client
        .send(ApiRequest::post("/orders").json(&serde_json::json!({"qty": 1})))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorKind::Unauthorized);
}

/// Validates that a keyed POST is refreshed and replayed with the same key.
///
/// Assertions:
/// - Both attempts carry the caller's idempotency key
/// - The replay carries the refreshed bearer and succeeds
#[tokio::test]
async fn test_keyed_post_replays_with_same_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/orders"))
        .and(header("idempotency-key", "order-key-0001"))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"id": 9})))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/orders"))
        .and(header("idempotency-key", "order-key-0001"))
        .respond_with(ResponseTemplate::new(401))
        .with_priority(2)
        .expect(1)
        .mount(&server)
        .await;
    mount_refresh(&server, "fresh", Duration::ZERO, 1).await;

    let client = client_for(&server);
    client.token_store().set(Some("stale".into()));

    let created: serde_json::Value = client
        .send_json(
            ApiRequest::post("/orders")
                .json(&serde_json::json!({"qty": 1}))
                .idempotency_key("order-key-0001"),
        )
        .await
        .unwrap();
    assert_eq!(created["id"], 9);
}

/// Validates that a 401 for a token that was already replaced does not refresh again.
///
/// Assertions:
/// - The call is resent with the newer stored bearer and succeeds
/// - The refresh endpoint is never called
#[tokio::test]
async fn test_late_unauthorized_after_rotation_resends_without_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/items"))
        .and(header("authorization", "Bearer rotated"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/items"))
        .and(header("authorization", "Bearer stale"))
        .respond_with(ResponseTemplate::new(401).set_delay(Duration::from_millis(300)))
        .with_priority(2)
        .expect(1)
        .mount(&server)
        .await;
    mount_refresh(&server, "unused", Duration::ZERO, 0).await;

    let client = client_for(&server);
    client.token_store().set(Some("stale".into()));

    let store = client.token_store().clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        store.set(Some("rotated".into()));
    });

    let body: serde_json::Value = client.get("/items").await.unwrap();
    assert_eq!(body["ok"], true);
    assert_eq!(client.refresh_gate().refresh_count(), 0);
    assert_eq!(hits(&server, "POST", REFRESH_PATH).await, 0);
}
