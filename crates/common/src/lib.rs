//! Client-side building blocks shared across authflow crates.
//!
//! # Feature Tiers
//!
//! - `foundation`: idempotency keys (no async)
//! - `runtime` (default): token store, claims, cross-context signalling,
//!   cancellation
//! - `test-utils`: exposes `TokenStore::reset` to downstream test suites

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

// Foundation tier
// -----------------------------------------------------------------
#[cfg(feature = "foundation")]
pub mod idempotency;

// Runtime tier
// --------------------------------------------------------------------
#[cfg(feature = "runtime")]
pub mod auth;
#[cfg(feature = "runtime")]
pub mod cancellation;

// Re-export commonly used types
// ------------------------
#[cfg(feature = "runtime")]
pub use auth::{AccessToken, CrossContextSignal, SharedOrigin, Subscription, TokenStore};
#[cfg(feature = "runtime")]
pub use cancellation::{AbortReason, CallSignal};
