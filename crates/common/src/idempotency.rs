//! Idempotency key generation and validation
//!
//! Keys identify one logical mutating attempt so the backend can deduplicate
//! replays. Fresh keys carry 192 bits of randomness encoded with the URL-safe
//! base64 alphabet (no padding), which keeps them inside `[A-Za-z0-9_-]`.

use authflow_domain::constants::{
    IDEMPOTENCY_KEY_GATEWAY_LEN, IDEMPOTENCY_KEY_MAX_LEN, IDEMPOTENCY_KEY_MIN_LEN,
    IDEMPOTENCY_PREFIX_MAX_LEN,
};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use once_cell::sync::Lazy;
use rand::RngCore;
use regex::Regex;

const KEY_ENTROPY_BYTES: usize = 24;

// Length bounds are checked separately; the regex only guards the charset.
static KEY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_-]+$").expect("KEY_PATTERN should compile - this is a bug")
});

/// Generate a fresh idempotency key.
///
/// 24 random bytes encode to 32 characters, comfortably inside the 64
/// character bound most gateways accept.
///
/// # Examples
/// ```
/// use authflow_common::idempotency::{is_valid, new_key};
///
/// let key = new_key();
/// assert!(is_valid(&key));
/// assert!(key.len() <= 64);
/// ```
pub fn new_key() -> String {
    let mut bytes = [0u8; KEY_ENTROPY_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    let mut key = URL_SAFE_NO_PAD.encode(bytes);
    key.truncate(IDEMPOTENCY_KEY_GATEWAY_LEN);
    key
}

/// Generate a key carrying a short semantic label, e.g. `checkout-3fQ…`.
///
/// The label is reduced to `[A-Za-z0-9_-]` and at most 24 characters; an
/// empty label yields a plain [`new_key`]. The combined key never exceeds 64
/// characters.
pub fn new_key_with_prefix(prefix: &str) -> String {
    let label = sanitize_prefix(prefix);
    let key = new_key();
    if label.is_empty() {
        return key;
    }

    let mut combined = format!("{label}-{key}");
    combined.truncate(IDEMPOTENCY_KEY_GATEWAY_LEN);
    combined
}

/// Check length (8–128) and charset (`[A-Za-z0-9_-]`) of a key.
pub fn is_valid(key: &str) -> bool {
    (IDEMPOTENCY_KEY_MIN_LEN..=IDEMPOTENCY_KEY_MAX_LEN).contains(&key.len())
        && KEY_PATTERN.is_match(key)
}

fn sanitize_prefix(prefix: &str) -> String {
    prefix
        .trim()
        .chars()
        .filter_map(|c| match c {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '-' | '_' => Some(c),
            ' ' | '.' | ':' | '/' => Some('-'),
            _ => None,
        })
        .take(IDEMPOTENCY_PREFIX_MAX_LEN)
        .collect::<String>()
        .trim_matches('-')
        .to_string()
}
