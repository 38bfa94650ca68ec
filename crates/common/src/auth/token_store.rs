//! In-memory access token store with change notification
//!
//! Holds the current [`AccessToken`] for one execution context:
//! - Whole-value reads and writes through a `watch` channel
//! - Ordered listener registry, each listener isolated from the others' panics
//! - Logout propagation to sibling contexts through a [`CrossContextSignal`]
//! - Claim helpers for UX (expiry countdowns), never for authorization

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::claims::{decode_payload, TokenClaims};
use super::signal::{ContextSignal, CrossContextSignal, NoopSignal};
use super::token::AccessToken;
use crate::cancellation::{AbortReason, CallSignal};

type Listener = Arc<dyn Fn(Option<&AccessToken>) + Send + Sync>;

/// Returned by [`TokenStore::wait_for`] when the caller cancels the wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("wait for token was cancelled")]
pub struct WaitCancelled;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChangeOrigin {
    Local,
    Remote,
}

struct Inner {
    value: watch::Sender<Option<AccessToken>>,
    listeners: Mutex<BTreeMap<u64, Listener>>,
    next_listener: AtomicU64,
    signal: Arc<dyn CrossContextSignal>,
    binding: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(handle) = self.binding.get_mut().take() {
            handle.abort();
        }
    }
}

/// Access token holder for one context.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct TokenStore {
    inner: Arc<Inner>,
}

impl fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenStore")
            .field("has_token", &self.inner.value.borrow().is_some())
            .field("listeners", &self.inner.listeners.lock().len())
            .field("transport", &self.inner.signal.transport())
            .field("bound", &self.is_bound())
            .finish()
    }
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl TokenStore {
    /// Create a store that propagates logout through `signal`.
    #[must_use]
    pub fn new(signal: Arc<dyn CrossContextSignal>) -> Self {
        let (value, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                value,
                listeners: Mutex::new(BTreeMap::new()),
                next_listener: AtomicU64::new(0),
                signal,
                binding: Mutex::new(None),
            }),
        }
    }

    /// Store without sibling contexts.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(NoopSignal))
    }

    /// Current token.
    ///
    /// The first call made inside a Tokio runtime also starts listening for
    /// logouts from other contexts.
    pub fn get(&self) -> Option<AccessToken> {
        self.bind();
        self.peek()
    }

    fn peek(&self) -> Option<AccessToken> {
        self.inner.value.borrow().clone()
    }

    /// Replace the token.
    ///
    /// Listeners run only when the value changes. Clearing the token also
    /// tells other contexts to log out.
    pub fn set(&self, token: Option<AccessToken>) {
        self.apply(token, ChangeOrigin::Local);
    }

    fn apply(&self, token: Option<AccessToken>, origin: ChangeOrigin) {
        let clearing = token.is_none();
        let changed = self.inner.value.send_if_modified(|current| {
            if *current == token {
                false
            } else {
                *current = token;
                true
            }
        });

        if changed {
            debug!(present = !clearing, ?origin, "access token changed");
            self.notify();
        }

        if clearing && origin == ChangeOrigin::Local {
            if let Err(e) = self.inner.signal.publish(ContextSignal::Logout) {
                debug!(error = %e, transport = self.inner.signal.transport(), "logout broadcast failed");
            }
        }
    }

    fn notify(&self) {
        let listeners: Vec<Listener> = self.inner.listeners.lock().values().cloned().collect();
        let current = self.peek();
        for listener in listeners {
            invoke(&listener, current.as_ref());
        }
    }

    /// Register `listener` for token changes.
    ///
    /// Listeners run in registration order. With `fire_immediately` the
    /// listener is also invoked once with the current value. The returned
    /// handle removes the listener when dropped.
    pub fn subscribe<F>(&self, listener: F, fire_immediately: bool) -> Subscription
    where
        F: Fn(Option<&AccessToken>) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        let listener: Listener = Arc::new(listener);
        self.inner.listeners.lock().insert(id, Arc::clone(&listener));

        if fire_immediately {
            invoke(&listener, self.peek().as_ref());
        }

        Subscription { id, store: Arc::downgrade(&self.inner) }
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }

    /// Wait until `predicate` holds for the current token.
    ///
    /// The current value is checked first. Resolves to `Ok(None)` when
    /// `timeout` elapses and to `Err(WaitCancelled)` when `cancel` fires.
    ///
    /// # Errors
    /// Returns [`WaitCancelled`] if the caller's token fires first.
    pub async fn wait_for<P>(
        &self,
        mut predicate: P,
        timeout: Option<Duration>,
        cancel: Option<&CancellationToken>,
    ) -> Result<Option<AccessToken>, WaitCancelled>
    where
        P: FnMut(Option<&AccessToken>) -> bool + Send,
    {
        let mut receiver = self.inner.value.subscribe();
        let wait = async move {
            receiver
                .wait_for(|value| predicate(value.as_ref()))
                .await
                .ok()
                .and_then(|value| value.clone())
        };

        match CallSignal::new(cancel, timeout).guard(wait).await {
            Ok(token) => Ok(token),
            Err(AbortReason::TimedOut(_)) => Ok(None),
            Err(AbortReason::Cancelled) => Err(WaitCancelled),
        }
    }

    /// Claims of the current token, if it is a decodable JWT.
    pub fn decode_payload(&self) -> Option<TokenClaims> {
        self.peek().and_then(|token| decode_payload(token.expose()))
    }

    /// Seconds until the current token's `exp` claim.
    pub fn seconds_until_expiry(&self) -> Option<i64> {
        self.decode_payload().and_then(|claims| claims.seconds_until_expiry())
    }

    /// True when the token expires within `early_seconds`. Missing or
    /// undecodable tokens report `false`.
    pub fn is_expired(&self, early_seconds: i64) -> bool {
        self.decode_payload().is_some_and(|claims| claims.is_expired(early_seconds))
    }

    /// Start listening for logouts from other contexts.
    ///
    /// Returns whether a listener is running afterwards. Idempotent; a no-op
    /// outside a Tokio runtime or when the transport is unavailable.
    pub fn bind(&self) -> bool {
        let mut binding = self.inner.binding.lock();
        if binding.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return true;
        }
        if !self.inner.signal.is_available() {
            return false;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return false;
        };
        let Some(mut signals) = self.inner.signal.subscribe() else {
            return false;
        };

        let weak = Arc::downgrade(&self.inner);
        let transport = self.inner.signal.transport();
        *binding = Some(runtime.spawn(async move {
            while let Some(signal) = signals.next().await {
                let Some(inner) = weak.upgrade() else { break };
                match signal {
                    ContextSignal::Logout => {
                        info!(transport, "logout received from another context");
                        TokenStore { inner }.apply(None, ChangeOrigin::Remote);
                    }
                }
            }
        }));
        debug!(transport, "token store bound to cross-context signal");
        true
    }

    /// Stop listening for other contexts. Local state is kept.
    pub fn shutdown(&self) {
        if let Some(handle) = self.inner.binding.lock().take() {
            handle.abort();
            debug!("token store unbound");
        }
    }

    pub fn is_bound(&self) -> bool {
        self.inner.binding.lock().as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Drop the token, all listeners and the cross-context binding without
    /// notifying anyone.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn reset(&self) {
        self.shutdown();
        self.inner.listeners.lock().clear();
        self.inner.value.send_replace(None);
    }
}

fn invoke(listener: &Listener, token: Option<&AccessToken>) {
    if catch_unwind(AssertUnwindSafe(|| listener(token))).is_err() {
        warn!("token listener panicked; continuing with remaining listeners");
    }
}

/// Registration handle returned by [`TokenStore::subscribe`].
#[must_use = "dropping the subscription removes the listener"]
pub struct Subscription {
    id: u64,
    store: Weak<Inner>,
}

impl Subscription {
    /// Remove the listener now.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.store.upgrade() {
            inner.listeners.lock().remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[test]
    fn test_set_and_get_without_runtime() {
        let store = TokenStore::in_memory();
        assert!(store.get().is_none());
        store.set(Some("abc".into()));
        assert_eq!(store.get().unwrap().expose(), "abc");
        assert!(!store.is_bound());
    }

    #[test]
    fn test_listeners_fire_only_on_change() {
        let store = TokenStore::in_memory();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let _sub = store.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }, false);

        store.set(Some("a".into()));
        store.set(Some("a".into()));
        store.set(Some("b".into()));
        store.set(None);
        store.set(None);

        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_fire_immediately_sees_current_value() {
        let store = TokenStore::in_memory();
        store.set(Some("now".into()));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = store.subscribe(
            move |token| sink.lock().push(token.map(|t| t.expose().to_string())),
            true,
        );
        assert_eq!(*seen.lock(), vec![Some("now".to_string())]);
    }

    #[test]
    fn test_listener_order_and_panic_isolation() {
        let store = TokenStore::in_memory();
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::clone(&order);
        let _a = store.subscribe(move |_| first.lock().push("first"), false);
        let _b = store.subscribe(|_| panic!("listener failure"), false);
        let third = Arc::clone(&order);
        let _c = store.subscribe(move |_| third.lock().push("third"), false);

        store.set(Some("t".into()));
        assert_eq!(*order.lock(), vec!["first", "third"]);
    }

    #[test]
    fn test_dropping_subscription_removes_listener() {
        let store = TokenStore::in_memory();
        let sub = store.subscribe(|_| {}, false);
        let other = store.subscribe(|_| {}, false);
        assert_eq!(store.listener_count(), 2);
        sub.unsubscribe();
        assert_eq!(store.listener_count(), 1);
        drop(other);
        assert_eq!(store.listener_count(), 0);
    }

    #[test]
    fn test_claim_helpers_degrade_gracefully() {
        let store = TokenStore::in_memory();
        assert!(store.decode_payload().is_none());
        assert!(!store.is_expired(0));

        store.set(Some("not-a-jwt".into()));
        assert!(store.decode_payload().is_none());
        assert!(store.seconds_until_expiry().is_none());
        assert!(!store.is_expired(0));
    }

    #[test]
    fn test_is_expired_tolerates_extreme_margins() {
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;
        use base64::Engine;

        let exp = chrono::Utc::now().timestamp() + 60;
        let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{exp}}}"#));
        let store = TokenStore::in_memory();
        store.set(Some(format!("e30.{payload}.sig").into()));

        assert!(store.is_expired(i64::MAX));
        assert!(!store.is_expired(i64::MIN));
        assert!(!store.is_expired(0));
    }

    #[tokio::test]
    async fn test_wait_for_resolves_immediately_when_predicate_holds() {
        let store = TokenStore::in_memory();
        store.set(Some("ready".into()));
        let token = store.wait_for(|t| t.is_some(), Some(Duration::from_millis(10)), None).await;
        assert_eq!(token.unwrap().unwrap().expose(), "ready");
    }

    #[tokio::test]
    async fn test_wait_for_observes_later_set() {
        let store = TokenStore::in_memory();
        let writer = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.set(Some("late".into()));
        });

        let token = store.wait_for(|t| t.is_some(), Some(Duration::from_secs(2)), None).await;
        assert_eq!(token.unwrap().unwrap().expose(), "late");
    }

    #[tokio::test]
    async fn test_wait_for_times_out_with_none() {
        let store = TokenStore::in_memory();
        let result = store.wait_for(|t| t.is_some(), Some(Duration::from_millis(20)), None).await;
        assert_eq!(result, Ok(None));
    }

    #[tokio::test]
    async fn test_wait_for_cancelled() {
        let store = TokenStore::in_memory();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = store.wait_for(|t| t.is_some(), None, Some(&cancel)).await;
        assert_eq!(result, Err(WaitCancelled));
    }

    #[tokio::test]
    async fn test_reset_clears_everything_silently() {
        let store = TokenStore::in_memory();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let _sub = store.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }, false);
        store.set(Some("x".into()));
        store.reset();

        assert!(store.get().is_none());
        assert_eq!(store.listener_count(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
