//! HTTP transport
//!
//! One request, one buffered response. Retry, refresh and classification
//! live in [`crate::api`].

pub mod client;

pub use client::{BufferedResponse, HttpClient, HttpClientBuilder, TransportError};
