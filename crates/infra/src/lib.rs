//! # authflow Infrastructure
//!
//! Network-facing half of authflow.
//!
//! This crate contains:
//! - The resilient authenticated request pipeline ([`api`])
//! - A cancellable, single-attempt HTTP wrapper over `reqwest` ([`http`])
//! - Configuration loading from environment and files ([`config`])
//! - Logging bootstrap ([`observability`])
//!
//! ## Architecture
//! - Token state and cross-context signalling live in `authflow-common`
//! - Error taxonomy and configuration types live in `authflow-domain`
//! - All I/O lives here

pub mod api;
pub mod config;
pub mod http;
pub mod observability;

pub use api::{ApiClient, ApiClientBuilder, ApiRequest, ApiResponse, RefreshGate, RefreshOutcome, RetryScheduler};
pub use http::{BufferedResponse, HttpClient, HttpClientBuilder, TransportError};
pub use observability::init_tracing;
