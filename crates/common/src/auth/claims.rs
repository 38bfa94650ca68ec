//! JWT payload inspection
//!
//! Claims are read for UX purposes only (expiry countdowns, "session about to
//! end" banners). Signatures are never checked and a malformed token is not an
//! error: every helper degrades to `None` or `false`.

use std::collections::BTreeMap;

use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Claims carried in the payload segment of a JWT-style token.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    /// Expiry as seconds since the Unix epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,

    /// Issued-at as seconds since the Unix epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,

    /// Every other claim, untouched
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl TokenClaims {
    /// Expiry as a timestamp, if the `exp` claim is present and in range.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp.and_then(|exp| DateTime::from_timestamp(exp, 0))
    }

    /// Seconds left until `exp`, negative once expired.
    pub fn seconds_until_expiry(&self) -> Option<i64> {
        self.expires_at().map(|expires_at| expires_at.timestamp().saturating_sub(Utc::now().timestamp()))
    }

    /// True when `exp` is within `early_seconds` of now (or already past).
    ///
    /// Tokens without an `exp` claim are never considered expired.
    pub fn is_expired(&self, early_seconds: i64) -> bool {
        match self.expires_at() {
            Some(expires_at) => {
                let remaining = expires_at.timestamp().saturating_sub(Utc::now().timestamp());
                remaining <= early_seconds
            }
            None => false,
        }
    }
}

/// Decode the payload segment of `token`.
///
/// Accepts base64url with or without padding. Returns `None` for anything
/// that is not `header.payload[.signature]` with a JSON object payload.
pub fn decode_payload(token: &str) -> Option<TokenClaims> {
    let mut segments = token.split('.');
    let _header = segments.next()?;
    let payload = segments.next()?;
    if payload.is_empty() {
        return None;
    }

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .or_else(|_| URL_SAFE.decode(payload))
        .ok()?;
    serde_json::from_slice(&bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_with(payload: &serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
        let body = URL_SAFE_NO_PAD.encode(payload.to_string());
        format!("{header}.{body}.sig")
    }

    #[test]
    fn test_decodes_standard_claims() {
        let token = token_with(&serde_json::json!({"sub": "user-1", "exp": 4_102_444_800_i64, "role": "admin"}));
        let claims = decode_payload(&token).unwrap();
        assert_eq!(claims.sub.as_deref(), Some("user-1"));
        assert_eq!(claims.exp, Some(4_102_444_800));
        assert_eq!(claims.extra.get("role"), Some(&serde_json::json!("admin")));
    }

    #[test]
    fn test_padded_payload_is_accepted() {
        let header = URL_SAFE_NO_PAD.encode(b"{}");
        let body = URL_SAFE.encode(br#"{"sub":"abc"}"#);
        assert!(body.ends_with('='));
        let claims = decode_payload(&format!("{header}.{body}.x")).unwrap();
        assert_eq!(claims.sub.as_deref(), Some("abc"));
    }

    #[test]
    fn test_malformed_tokens_yield_none() {
        assert!(decode_payload("").is_none());
        assert!(decode_payload("opaque-token").is_none());
        assert!(decode_payload("a..c").is_none());
        assert!(decode_payload("a.!!!notbase64!!!.c").is_none());
        let not_json = URL_SAFE_NO_PAD.encode(b"plain text");
        assert!(decode_payload(&format!("a.{not_json}.c")).is_none());
    }

    #[test]
    fn test_expiry_helpers() {
        let now = Utc::now().timestamp();
        let claims = TokenClaims { exp: Some(now + 120), ..Default::default() };
        let remaining = claims.seconds_until_expiry().unwrap();
        assert!((118..=120).contains(&remaining));
        assert!(!claims.is_expired(0));
        assert!(claims.is_expired(300));

        let expired = TokenClaims { exp: Some(now - 5), ..Default::default() };
        assert!(expired.is_expired(0));
        assert!(expired.seconds_until_expiry().unwrap() < 0);
    }

    #[test]
    fn test_extreme_early_seconds_do_not_panic() {
        let now = Utc::now().timestamp();
        let claims = TokenClaims { exp: Some(now + 60), ..Default::default() };
        assert!(claims.is_expired(i64::MAX));
        assert!(!claims.is_expired(i64::MIN));
        let far = TokenClaims { exp: Some(DateTime::<Utc>::MAX_UTC.timestamp()), ..Default::default() };
        assert!(!far.is_expired(0));
        assert!(far.seconds_until_expiry().is_some());
    }

    #[test]
    fn test_missing_exp_is_never_expired() {
        let claims = TokenClaims::default();
        assert!(!claims.is_expired(10_000));
        assert!(claims.seconds_until_expiry().is_none());
    }
}
