//! Configuration loading
//!
//! Loads [`ClientConfig`](authflow_domain::ClientConfig) from environment
//! variables and files.

pub mod loader;

pub use loader::{load, load_from_env, load_from_file, probe_config_paths};
