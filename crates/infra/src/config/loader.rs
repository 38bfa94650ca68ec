//! Configuration loader
//!
//! Loads [`ClientConfig`] from environment variables or files.
//!
//! ## Loading Strategy
//! 1. First, attempts to load from environment variables
//! 2. If `AUTHFLOW_BASE_URL` is not set, falls back to loading from file
//! 3. Probes multiple paths for config files
//! 4. Supports JSON and TOML formats
//!
//! ## Environment Variables
//! - `AUTHFLOW_BASE_URL`: Base URL for relative request paths (required)
//! - `AUTHFLOW_REQUEST_TIMEOUT_MS`: Per-attempt timeout
//! - `AUTHFLOW_USER_AGENT`: `User-Agent` header value
//! - `AUTHFLOW_REFRESH_PATH`: Refresh endpoint path or URL
//! - `AUTHFLOW_REFRESH_TIMEOUT_MS`: Refresh call timeout
//! - `AUTHFLOW_RETRY_BASE_DELAY_MS`: Backoff base
//! - `AUTHFLOW_RETRY_MAX_RETRIES`: Transient retries (clamped to 2)
//! - `AUTHFLOW_RETRY_MAX_RETRY_AFTER_SECS`: Longest `Retry-After` honoured
//!
//! Optional variables fall back to the [`ClientConfig`] defaults.
//!
//! ## File Locations
//! The loader probes the following names in the current working directory,
//! its parent, and next to the executable:
//! `authflow.toml`, `authflow.json`, `config.toml`, `config.json`

use std::path::{Path, PathBuf};
use std::str::FromStr;

use authflow_domain::{AuthflowError, ClientConfig, Result};

const CONFIG_FILE_NAMES: &[&str] = &["authflow.toml", "authflow.json", "config.toml", "config.json"];

/// Load configuration with automatic fallback strategy
///
/// # Errors
/// Returns `AuthflowError::Config` if:
/// - Configuration cannot be loaded from either source
/// - File format is invalid
pub fn load() -> Result<ClientConfig> {
    match load_from_env() {
        Ok(config) => {
            tracing::info!("Configuration loaded from environment variables");
            Ok(config)
        }
        Err(e) => {
            tracing::debug!(error = ?e, "Failed to load from environment, trying file");
            load_from_file(None)
        }
    }
}

/// Load configuration from environment variables
///
/// # Errors
/// Returns `AuthflowError::Config` if `AUTHFLOW_BASE_URL` is missing or a
/// numeric variable does not parse.
pub fn load_from_env() -> Result<ClientConfig> {
    let mut config = ClientConfig::with_base_url(env_var("AUTHFLOW_BASE_URL")?);

    if let Some(timeout) = env_parse("AUTHFLOW_REQUEST_TIMEOUT_MS")? {
        config.request_timeout_ms = timeout;
    }
    config.user_agent = std::env::var("AUTHFLOW_USER_AGENT").ok().filter(|s| !s.is_empty());

    if let Ok(path) = std::env::var("AUTHFLOW_REFRESH_PATH") {
        config.refresh.path = path;
    }
    if let Some(timeout) = env_parse("AUTHFLOW_REFRESH_TIMEOUT_MS")? {
        config.refresh.timeout_ms = timeout;
    }

    if let Some(delay) = env_parse("AUTHFLOW_RETRY_BASE_DELAY_MS")? {
        config.retry.base_delay_ms = delay;
    }
    if let Some(retries) = env_parse("AUTHFLOW_RETRY_MAX_RETRIES")? {
        config.retry.max_retries = retries;
    }
    if let Some(secs) = env_parse("AUTHFLOW_RETRY_MAX_RETRY_AFTER_SECS")? {
        config.retry.max_retry_after_secs = secs;
    }

    Ok(config)
}

/// Load configuration from a file
///
/// If `path` is `None`, probes multiple locations for config files.
/// Format is detected by file extension.
///
/// # Errors
/// Returns `AuthflowError::Config` if:
/// - File not found (when path is specified)
/// - No config file found (when path is `None`)
/// - File format is invalid
pub fn load_from_file(path: Option<PathBuf>) -> Result<ClientConfig> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(AuthflowError::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            AuthflowError::Config(
                "No config file found in any of the standard locations".to_string(),
            )
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| AuthflowError::Config(format!("Failed to read config file: {}", e)))?;

    parse_config(&contents, &config_path)
}

fn parse_config(contents: &str, path: &Path) -> Result<ClientConfig> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| AuthflowError::Config(format!("Invalid TOML format: {}", e))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| AuthflowError::Config(format!("Invalid JSON format: {}", e))),
        _ => Err(AuthflowError::Config(format!("Unsupported config format: {}", extension))),
    }
}

/// Probe the standard locations for a config file
///
/// # Returns
/// The first config file found, or `None` if no file exists.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut dirs = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        dirs.push(cwd.clone());
        dirs.push(cwd.join(".."));
    }

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            dirs.push(exe_dir.to_path_buf());
        }
    }

    dirs.iter()
        .flat_map(|dir| CONFIG_FILE_NAMES.iter().map(move |name| dir.join(name)))
        .find(|path| path.exists())
}

/// Get required environment variable
///
/// # Errors
/// Returns `AuthflowError::Config` if the variable is not set.
fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| {
        AuthflowError::Config(format!("Missing required environment variable: {}", key))
    })
}

/// Parse an optional environment variable
///
/// # Errors
/// Returns `AuthflowError::Config` if the variable is set but invalid.
fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| AuthflowError::Config(format!("Invalid value for {}: {}", key, e))),
        Err(_) => Ok(None),
    }
}
