//! Cross-context logout signalling
//!
//! Several execution contexts (browser tabs, windows, workers) of one origin
//! each hold their own [`TokenStore`](super::TokenStore). When one of them logs
//! out, the others must drop their token too. Only the fact that a logout
//! happened crosses the boundary: the payload is always `{"type":"logout"}`.
//!
//! [`SharedOrigin`] models what the contexts of an origin share: named
//! broadcast channels and a key/value store that emits change events to every
//! context except the writer. Two transports are built on it:
//!
//! - [`BroadcastChannelSignal`] (primary)
//! - [`StorageSentinelSignal`] (fallback: write, then clear, a sentinel key)
//!
//! [`FallbackSignal`] picks between them and [`NoopSignal`] covers hosts
//! without any shared context.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use authflow_domain::constants::{LOGOUT_CHANNEL, LOGOUT_SENTINEL_KEY};
use dashmap::DashMap;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

const CHANNEL_CAPACITY: usize = 64;

/// Message exchanged between contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContextSignal {
    Logout,
}

/// Publishing failures. Always best-effort: callers log and move on.
#[derive(Debug, Error)]
pub enum SignalError {
    #[error("{0} transport is not available")]
    Unavailable(&'static str),

    #[error("failed to encode signal: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A transport able to tell sibling contexts about auth events.
pub trait CrossContextSignal: Send + Sync + fmt::Debug {
    /// Short transport name for logs.
    fn transport(&self) -> &'static str;

    fn is_available(&self) -> bool;

    /// Deliver `signal` to every other context. Never delivered back to the
    /// publishing context.
    fn publish(&self, signal: ContextSignal) -> Result<(), SignalError>;

    /// Stream of signals published by other contexts, or `None` when the
    /// transport is unavailable.
    ///
    /// The subscription is registered before this returns, so anything
    /// published afterwards is observed.
    fn subscribe(&self) -> Option<BoxStream<'static, ContextSignal>>;
}

/// Broadcast envelope; `origin` is the publishing context id.
#[derive(Debug, Clone)]
struct Envelope {
    origin: u64,
    payload: String,
}

/// Change notification emitted by [`SharedStorage`].
#[derive(Debug, Clone)]
pub struct StorageEvent {
    pub key: String,
    pub new_value: Option<String>,
    /// Context that performed the write
    pub origin: u64,
}

/// Origin-wide key/value store with change events.
#[derive(Debug)]
pub struct SharedStorage {
    items: DashMap<String, String>,
    events: broadcast::Sender<StorageEvent>,
}

impl SharedStorage {
    fn new() -> Self {
        let (events, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { items: DashMap::new(), events }
    }

    pub fn get_item(&self, key: &str) -> Option<String> {
        self.items.get(key).map(|value| value.clone())
    }

    /// Store `value` under `key`. An event is emitted only when the value
    /// actually changes.
    pub fn set_item(&self, key: &str, value: &str, origin: u64) {
        let previous = self.items.insert(key.to_string(), value.to_string());
        if previous.as_deref() != Some(value) {
            self.emit(key, Some(value.to_string()), origin);
        }
    }

    pub fn remove_item(&self, key: &str, origin: u64) {
        if self.items.remove(key).is_some() {
            self.emit(key, None, origin);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.events.subscribe()
    }

    fn emit(&self, key: &str, new_value: Option<String>, origin: u64) {
        // No receivers is not an error: nobody is listening yet.
        let _ = self.events.send(StorageEvent { key: key.to_string(), new_value, origin });
    }
}

#[derive(Debug)]
struct OriginInner {
    channels: Option<DashMap<String, broadcast::Sender<Envelope>>>,
    storage: Option<SharedStorage>,
    next_context: AtomicU64,
}

/// Everything the contexts of one origin share.
///
/// Cloning yields another handle to the same origin.
#[derive(Debug, Clone)]
pub struct SharedOrigin {
    inner: Arc<OriginInner>,
}

impl Default for SharedOrigin {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedOrigin {
    /// Origin with both broadcast channels and shared storage.
    pub fn new() -> Self {
        Self::with_transports(true, true)
    }

    /// Origin with a chosen subset of transports, e.g. a host lacking
    /// broadcast channels.
    pub fn with_transports(broadcast: bool, storage: bool) -> Self {
        Self {
            inner: Arc::new(OriginInner {
                channels: broadcast.then(DashMap::new),
                storage: storage.then(SharedStorage::new),
                next_context: AtomicU64::new(1),
            }),
        }
    }

    pub fn has_broadcast(&self) -> bool {
        self.inner.channels.is_some()
    }

    pub fn storage(&self) -> Option<&SharedStorage> {
        self.inner.storage.as_ref()
    }

    /// Allocate an id for a new context.
    pub fn next_context_id(&self) -> u64 {
        self.inner.next_context.fetch_add(1, Ordering::Relaxed)
    }

    /// The signal a new context should use: broadcast channel first, storage
    /// sentinel as fallback, each under the default names.
    pub fn context(&self) -> FallbackSignal {
        let context_id = self.next_context_id();
        FallbackSignal::new(
            Arc::new(BroadcastChannelSignal::new(self.clone(), LOGOUT_CHANNEL, context_id)),
            Arc::new(StorageSentinelSignal::new(self.clone(), LOGOUT_SENTINEL_KEY, context_id)),
        )
    }

    fn channel(&self, name: &str) -> Option<broadcast::Sender<Envelope>> {
        let channels = self.inner.channels.as_ref()?;
        let sender = channels
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone();
        Some(sender)
    }
}

/// Turn a broadcast receiver into a stream, skipping over lag.
fn receiver_stream<T: Clone + Send + 'static>(
    receiver: broadcast::Receiver<T>,
) -> BoxStream<'static, T> {
    stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(item) => return Some((item, receiver)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "cross-context receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .boxed()
}

fn decode(payload: &str) -> Option<ContextSignal> {
    match serde_json::from_str(payload) {
        Ok(signal) => Some(signal),
        Err(e) => {
            debug!(error = %e, "ignoring undecodable cross-context message");
            None
        }
    }
}

/// Named broadcast channel transport.
#[derive(Debug, Clone)]
pub struct BroadcastChannelSignal {
    origin: SharedOrigin,
    name: String,
    context_id: u64,
}

impl BroadcastChannelSignal {
    pub fn new(origin: SharedOrigin, name: impl Into<String>, context_id: u64) -> Self {
        Self { origin, name: name.into(), context_id }
    }
}

impl CrossContextSignal for BroadcastChannelSignal {
    fn transport(&self) -> &'static str {
        "broadcast_channel"
    }

    fn is_available(&self) -> bool {
        self.origin.has_broadcast()
    }

    fn publish(&self, signal: ContextSignal) -> Result<(), SignalError> {
        let sender =
            self.origin.channel(&self.name).ok_or(SignalError::Unavailable(self.transport()))?;
        let payload = serde_json::to_string(&signal)?;
        // Zero receivers only means no other context is listening.
        let _ = sender.send(Envelope { origin: self.context_id, payload });
        Ok(())
    }

    fn subscribe(&self) -> Option<BoxStream<'static, ContextSignal>> {
        let receiver = self.origin.channel(&self.name)?.subscribe();
        let own = self.context_id;
        Some(
            receiver_stream(receiver)
                .filter_map(move |envelope| async move {
                    if envelope.origin == own {
                        None
                    } else {
                        decode(&envelope.payload)
                    }
                })
                .boxed(),
        )
    }
}

/// Shared-storage sentinel transport.
///
/// Publishing writes the signal under the sentinel key and clears it again,
/// so the next publish is a fresh change. Only the write carries a value;
/// removals are ignored by subscribers.
#[derive(Debug, Clone)]
pub struct StorageSentinelSignal {
    origin: SharedOrigin,
    key: String,
    context_id: u64,
}

impl StorageSentinelSignal {
    pub fn new(origin: SharedOrigin, key: impl Into<String>, context_id: u64) -> Self {
        Self { origin, key: key.into(), context_id }
    }
}

impl CrossContextSignal for StorageSentinelSignal {
    fn transport(&self) -> &'static str {
        "storage_sentinel"
    }

    fn is_available(&self) -> bool {
        self.origin.storage().is_some()
    }

    fn publish(&self, signal: ContextSignal) -> Result<(), SignalError> {
        let storage = self.origin.storage().ok_or(SignalError::Unavailable(self.transport()))?;
        let payload = serde_json::to_string(&signal)?;
        storage.set_item(&self.key, &payload, self.context_id);
        storage.remove_item(&self.key, self.context_id);
        Ok(())
    }

    fn subscribe(&self) -> Option<BoxStream<'static, ContextSignal>> {
        let receiver = self.origin.storage()?.subscribe();
        let own = self.context_id;
        let key = self.key.clone();
        Some(
            receiver_stream(receiver)
                .filter_map(move |event| {
                    let relevant = event.origin != own && event.key == key;
                    async move {
                        match (relevant, event.new_value) {
                            (true, Some(value)) => decode(&value),
                            _ => None,
                        }
                    }
                })
                .boxed(),
        )
    }
}

/// Primary transport with a fallback.
#[derive(Debug, Clone)]
pub struct FallbackSignal {
    primary: Arc<dyn CrossContextSignal>,
    fallback: Arc<dyn CrossContextSignal>,
}

impl FallbackSignal {
    pub fn new(primary: Arc<dyn CrossContextSignal>, fallback: Arc<dyn CrossContextSignal>) -> Self {
        Self { primary, fallback }
    }
}

impl CrossContextSignal for FallbackSignal {
    fn transport(&self) -> &'static str {
        if self.primary.is_available() {
            self.primary.transport()
        } else {
            self.fallback.transport()
        }
    }

    fn is_available(&self) -> bool {
        self.primary.is_available() || self.fallback.is_available()
    }

    fn publish(&self, signal: ContextSignal) -> Result<(), SignalError> {
        if self.primary.is_available() {
            self.primary.publish(signal)
        } else {
            self.fallback.publish(signal)
        }
    }

    fn subscribe(&self) -> Option<BoxStream<'static, ContextSignal>> {
        let streams: Vec<_> =
            [&self.primary, &self.fallback].into_iter().filter_map(|t| t.subscribe()).collect();
        if streams.is_empty() {
            None
        } else {
            Some(stream::select_all(streams).boxed())
        }
    }
}

/// Signal for hosts without sibling contexts.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSignal;

impl CrossContextSignal for NoopSignal {
    fn transport(&self) -> &'static str {
        "noop"
    }

    fn is_available(&self) -> bool {
        false
    }

    fn publish(&self, _signal: ContextSignal) -> Result<(), SignalError> {
        Ok(())
    }

    fn subscribe(&self) -> Option<BoxStream<'static, ContextSignal>> {
        None
    }
}
