//! Logging bootstrap
//!
//! The library only emits `tracing` events; hosts that do not install their
//! own subscriber can call [`init_tracing`]. The filter comes from
//! `AUTHFLOW_LOG`, then `RUST_LOG`, then defaults to `info`.

use std::io::IsTerminal;
use std::sync::Once;

use tracing_subscriber::EnvFilter;

const LOG_ENV_VAR: &str = "AUTHFLOW_LOG";
const DEFAULT_DIRECTIVE: &str = "info";

/// Install a global `fmt` subscriber writing to stderr.
///
/// Safe to call more than once (tests do); only the first call has an
/// effect. With `json` set, events are emitted as one JSON object per line.
pub fn init_tracing(json: bool) {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = env_filter();
        let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);

        // try_init: a host may already have installed a subscriber
        let result = if json {
            builder.json().with_current_span(true).try_init()
        } else {
            builder.with_ansi(std::io::stderr().is_terminal()).try_init()
        };

        if result.is_ok() {
            tracing::debug!(json, "tracing initialised");
        }
    });
}

fn env_filter() -> EnvFilter {
    std::env::var(LOG_ENV_VAR)
        .ok()
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_DIRECTIVE))
}
