//! Integration tests for the token store
//!
//! Tests logout propagation between contexts of one origin over each
//! transport, and isolation when no transport is available.

#![cfg(feature = "runtime")]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use authflow_common::auth::{
    BroadcastChannelSignal, ContextSignal, CrossContextSignal, FallbackSignal, SharedOrigin,
    SignalError, StorageSentinelSignal, TokenStore,
};
use futures::stream::BoxStream;
use uuid::Uuid;

const WAIT: Duration = Duration::from_secs(2);

/// Signal wrapper counting publishes, to observe echo suppression.
#[derive(Debug)]
struct CountingSignal {
    inner: FallbackSignal,
    published: Arc<AtomicUsize>,
}

impl CrossContextSignal for CountingSignal {
    fn transport(&self) -> &'static str {
        self.inner.transport()
    }

    fn is_available(&self) -> bool {
        self.inner.is_available()
    }

    fn publish(&self, signal: ContextSignal) -> Result<(), SignalError> {
        self.published.fetch_add(1, Ordering::SeqCst);
        self.inner.publish(signal)
    }

    fn subscribe(&self) -> Option<BoxStream<'static, ContextSignal>> {
        self.inner.subscribe()
    }
}

fn tab(origin: &SharedOrigin) -> TokenStore {
    TokenStore::new(Arc::new(origin.context()))
}

/// Validates that a logout in one context clears the token in another.
///
/// Assertions:
/// - Both contexts hold their own token before logout
/// - Clearing context A makes context B observe `None` within the wait window
#[tokio::test]
async fn test_logout_propagates_over_broadcast_channel() {
    let origin = SharedOrigin::new();
    let a = tab(&origin);
    let b = tab(&origin);

    a.set(Some("token-a".into()));
    b.set(Some("token-b".into()));
    assert!(b.bind());

    a.set(None);

    let observed = b.wait_for(|token| token.is_none(), Some(WAIT), None).await;
    assert_eq!(observed, Ok(None));
    assert!(b.get().is_none());
}

/// Validates propagation through the storage sentinel when broadcast
/// channels are missing.
///
/// Assertions:
/// - Context B's listener fires with `None`
/// - The sentinel key does not linger in shared storage
#[tokio::test]
async fn test_logout_propagates_over_storage_fallback() {
    let origin = SharedOrigin::with_transports(false, true);
    let a = tab(&origin);
    let b = tab(&origin);

    b.set(Some("token-b".into()));
    let _ = b.get();
    assert!(b.is_bound());

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let _sub = b.subscribe(
        move |token| {
            let _ = tx.send(token.is_some());
        },
        false,
    );

    a.set(None);

    let present = tokio::time::timeout(WAIT, rx.recv()).await.unwrap();
    assert_eq!(present, Some(false));
    assert!(origin.storage().unwrap().get_item("authflow.auth.logout").is_none());
}

/// Validates that only the logout marker crosses contexts.
///
/// Assertions:
/// - The sentinel write carries exactly `{"type":"logout"}`
/// - The token value never appears in the payload
#[tokio::test]
async fn test_logout_payload_never_contains_token() {
    let origin = SharedOrigin::with_transports(false, true);
    let mut events = origin.storage().unwrap().subscribe();
    let a = tab(&origin);

    a.set(Some("secret-token-value".into()));
    a.set(None);

    let event = tokio::time::timeout(WAIT, events.recv()).await.unwrap().unwrap();
    let payload = event.new_value.unwrap();
    assert_eq!(payload, r#"{"type":"logout"}"#);
    assert!(!payload.contains("secret-token-value"));
}

/// Validates that a logout received from another context is not echoed.
///
/// Assertions:
/// - The publishing context publishes once
/// - The receiving context clears its token without publishing
#[tokio::test]
async fn test_remote_logout_is_not_republished() {
    let origin = SharedOrigin::new();
    let channel = format!("authflow.test.{}", Uuid::new_v4());
    let sentinel = format!("{channel}.logout");

    let build = |published: &Arc<AtomicUsize>| {
        let id = origin.next_context_id();
        let signal = FallbackSignal::new(
            Arc::new(BroadcastChannelSignal::new(origin.clone(), channel.clone(), id)),
            Arc::new(StorageSentinelSignal::new(origin.clone(), sentinel.clone(), id)),
        );
        TokenStore::new(Arc::new(CountingSignal { inner: signal, published: Arc::clone(published) }))
    };

    let a_published = Arc::new(AtomicUsize::new(0));
    let b_published = Arc::new(AtomicUsize::new(0));
    let a = build(&a_published);
    let b = build(&b_published);
    assert!(a.bind());
    assert!(b.bind());

    b.set(Some("token-b".into()));
    a.set(None);

    let observed = b.wait_for(|token| token.is_none(), Some(WAIT), None).await;
    assert_eq!(observed, Ok(None));
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(a_published.load(Ordering::SeqCst), 1);
    assert_eq!(b_published.load(Ordering::SeqCst), 0);
}

/// Validates isolation when the origin offers no transport at all.
///
/// Assertions:
/// - Neither context binds
/// - Clearing context A leaves context B's token untouched
#[tokio::test]
async fn test_unavailable_transport_leaves_other_context_untouched() {
    let origin = SharedOrigin::with_transports(false, false);
    let a = tab(&origin);
    let b = tab(&origin);

    a.set(Some("token-a".into()));
    b.set(Some("token-b".into()));
    assert!(!a.bind());
    assert!(!b.bind());

    a.set(None);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(a.get().is_none());
    assert_eq!(b.get().unwrap().expose(), "token-b");
}

/// Validates that `shutdown` detaches a context from the origin.
///
/// Assertions:
/// - After shutdown no listener of the detached context fires when a sibling
///   logs out
#[tokio::test]
async fn test_shutdown_stops_listening() {
    let origin = SharedOrigin::new();
    let a = tab(&origin);
    let b = tab(&origin);

    b.set(Some("token-b".into()));
    assert!(b.bind());
    b.shutdown();
    assert!(!b.is_bound());

    let changes = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&changes);
    let _sub = b.subscribe(
        move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        },
        false,
    );

    a.set(None);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(changes.load(Ordering::SeqCst), 0);
}
