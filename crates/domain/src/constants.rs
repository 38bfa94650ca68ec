//! Application constants
//!
//! Header names, wire identifiers and bounds shared by every authflow crate.

// Outbound headers
pub const HEADER_AUTHORIZATION: &str = "authorization";
pub const HEADER_CACHE_CONTROL: &str = "cache-control";
pub const HEADER_CONTENT_TYPE: &str = "content-type";
pub const HEADER_IDEMPOTENCY_KEY: &str = "idempotency-key";
pub const HEADER_REAUTH_PROOF: &str = "x-reauth-proof";

// Inbound headers
pub const HEADER_REQUEST_ID: &str = "x-request-id";
pub const HEADER_RETRY_AFTER: &str = "retry-after";
pub const HEADER_REAUTH_REQUIRED: &str = "x-reauth-required";
pub const HEADER_STEP_UP_HINT: &str = "x-step-up-hint";
pub const HEADER_STEP_UP_CHALLENGE_ID: &str = "x-step-up-challenge-id";
pub const HEADER_STEP_UP_EXPIRES_AT: &str = "x-step-up-expires-at";
pub const HEADER_STEP_UP_METHOD: &str = "x-step-up-method";
pub const HEADER_WWW_AUTHENTICATE: &str = "www-authenticate";

pub const CACHE_NO_STORE: &str = "no-store";
pub const CONTENT_TYPE_JSON: &str = "application/json";

// Cross-context signalling
pub const LOGOUT_CHANNEL: &str = "authflow.auth";
pub const LOGOUT_SENTINEL_KEY: &str = "authflow.auth.logout";

// Idempotency keys
pub const IDEMPOTENCY_KEY_MIN_LEN: usize = 8;
pub const IDEMPOTENCY_KEY_MAX_LEN: usize = 128;
pub const IDEMPOTENCY_KEY_GATEWAY_LEN: usize = 64;
pub const IDEMPOTENCY_PREFIX_MAX_LEN: usize = 24;

// Pipeline defaults
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_REFRESH_PATH: &str = "/auth/refresh";
pub const DEFAULT_REFRESH_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 300;
pub const DEFAULT_MAX_RETRY_AFTER_SECS: u64 = 120;
pub const MAX_TRANSIENT_RETRIES: u32 = 2;
