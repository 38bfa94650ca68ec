//! Resilient authenticated request layer
//!
//! # Architecture
//!
//! - [`ApiClient`] owns the collaborators and exposes typed helpers
//! - [`pipeline`] runs the per-call state machine
//! - [`classifier`] turns error responses into [`AppError`](authflow_domain::AppError)
//! - [`RefreshGate`] keeps token refresh single-flight
//! - [`RetryScheduler`] decides replay safety and backoff
//!
//! # Example
//!
//! ```no_run
//! use authflow_domain::ClientConfig;
//! use authflow_infra::api::{ApiClient, ApiRequest};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ApiClient::new(ClientConfig::with_base_url("https://api.example.com"))?;
//! client.token_store().set(Some("access-token".into()));
//!
//! let profile: serde_json::Value = client.get("/profiles/me").await?;
//! let created: serde_json::Value = client
//!     .send_json(ApiRequest::post("/watchlist").json(&profile).idempotent())
//!     .await?;
//! # let _ = created;
//! # Ok(())
//! # }
//! ```

pub mod classifier;
pub mod client;
pub mod headers;
pub mod pipeline;
pub mod refresh;
pub mod request;
pub mod retry;

pub use classifier::classify;
pub use client::{ApiClient, ApiClientBuilder, ApiResponse};
pub use refresh::{RefreshGate, RefreshOutcome};
pub use request::{ApiRequest, Idempotency, RequestBody};
pub use retry::{RetryDecision, RetryScheduler, StopReason};
