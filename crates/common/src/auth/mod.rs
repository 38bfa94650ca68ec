//! Access token state shared by the request pipeline
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐        ┌──────────────────────┐
//! │   TokenStore    │◄──────►│  CrossContextSignal  │  logout only
//! └────────┬────────┘        └──────────┬───────────┘
//!          │                            ├──► BroadcastChannelSignal
//!          ├──► listeners (ordered)     ├──► StorageSentinelSignal
//!          └──► claims (UX hints)       └──► NoopSignal
//! ```
//!
//! # Usage Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use authflow_common::auth::{SharedOrigin, TokenStore};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let origin = SharedOrigin::new();
//! let tab = TokenStore::new(Arc::new(origin.context()));
//!
//! tab.set(Some("eyJhbGciOi...".into()));
//! let _sub = tab.subscribe(|token| {
//!     if token.is_none() {
//!         // route to the login screen
//!     }
//! }, false);
//!
//! tab.set(None); // also tells every other tab of `origin` to log out
//! # }
//! ```

pub mod claims;
pub mod signal;
pub mod token;
pub mod token_store;

pub use claims::{decode_payload, TokenClaims};
pub use signal::{
    BroadcastChannelSignal, ContextSignal, CrossContextSignal, FallbackSignal, NoopSignal,
    SharedOrigin, SharedStorage, SignalError, StorageEvent, StorageSentinelSignal,
};
pub use token::AccessToken;
pub use token_store::{Subscription, TokenStore, WaitCancelled};
