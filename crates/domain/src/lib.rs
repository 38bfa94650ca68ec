//! # Authflow Domain
//!
//! Shared types for the authenticated request subsystem.
//!
//! This crate contains:
//! - The stable error taxonomy ([`ErrorKind`]) and call outcome ([`AppError`])
//! - Client configuration structures
//! - Header names, wire identifiers and bounds
//!
//! ## Architecture
//! - No dependencies on other authflow crates
//! - Pure data; no I/O

pub mod config;
pub mod constants;
pub mod errors;
pub mod macros;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
