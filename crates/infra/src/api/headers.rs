//! URL resolution, outbound header composition and inbound header parsing

use authflow_common::AccessToken;
use authflow_domain::constants::{
    CACHE_NO_STORE, CONTENT_TYPE_JSON, HEADER_IDEMPOTENCY_KEY, HEADER_REAUTH_PROOF,
    HEADER_REQUEST_ID, HEADER_RETRY_AFTER,
};
use authflow_domain::{AppError, ErrorCause, ErrorKind};
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE};
use url::Url;

use super::request::{ApiRequest, RequestBody};

/// Join `path` to `base` unless `path` is already an absolute URL.
pub fn resolve_url(base: &str, path: &str) -> String {
    if Url::parse(path).is_ok_and(|url| url.has_host()) {
        return path.to_string();
    }
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        base.to_string()
    } else {
        format!("{base}/{path}")
    }
}

/// Build the header set for one attempt.
///
/// Defaults are applied first and caller headers replace them by name.
pub fn compose_headers(
    request: &ApiRequest,
    token: Option<&AccessToken>,
    idempotency_key: Option<&str>,
) -> Result<HeaderMap, AppError> {
    let caller = request.header_map();
    let mut headers = HeaderMap::new();

    headers.insert(CACHE_CONTROL, HeaderValue::from_static(CACHE_NO_STORE));

    if let Some(token) = token.filter(|t| !t.is_empty() && !request.skips_auth()) {
        let mut value = header_value(&format!("Bearer {}", token.expose()), "authorization")?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }

    match request.body() {
        Some(RequestBody::Json(_)) => {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE_JSON));
        }
        Some(RequestBody::Raw { content_type: Some(content_type), .. }) => {
            headers.insert(CONTENT_TYPE, header_value(content_type, "content-type")?);
        }
        _ => {}
    }

    if let Some(key) = idempotency_key {
        headers.insert(
            HeaderName::from_static(HEADER_IDEMPOTENCY_KEY),
            header_value(key, HEADER_IDEMPOTENCY_KEY)?,
        );
    }

    if let Some(proof) = request.reauth_proof_value() {
        let mut value = header_value(proof, HEADER_REAUTH_PROOF)?;
        value.set_sensitive(true);
        headers.insert(HeaderName::from_static(HEADER_REAUTH_PROOF), value);
    }

    for name in caller.keys() {
        headers.remove(name);
    }
    for (name, value) in caller {
        headers.append(name.clone(), value.clone());
    }

    Ok(headers)
}

fn header_value(value: &str, name: &str) -> Result<HeaderValue, AppError> {
    HeaderValue::from_str(value).map_err(|_| {
        AppError::new(ErrorKind::BadRequest)
            .with_cause(ErrorCause::InvalidRequest(format!("invalid value for {name} header")))
    })
}

/// Header value as a trimmed, non-empty string.
pub fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

pub fn request_id(headers: &HeaderMap) -> Option<String> {
    header_str(headers, HEADER_REQUEST_ID).map(str::to_string)
}

/// `Retry-After` in whole seconds, rounded up.
///
/// Accepts delta-seconds (fractions tolerated) or an HTTP-date; dates in the
/// past yield zero.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    parse_retry_after_value(header_str(headers, HEADER_RETRY_AFTER)?, Utc::now())
}

fn parse_retry_after_value(raw: &str, now: DateTime<Utc>) -> Option<u64> {
    if let Ok(seconds) = raw.parse::<u64>() {
        return Some(seconds);
    }
    if let Ok(seconds) = raw.parse::<f64>() {
        return (seconds.is_finite() && seconds >= 0.0).then(|| seconds.ceil() as u64);
    }

    let at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    let millis = (at - now).num_milliseconds().max(0);
    Some(u64::try_from(millis).unwrap_or(0).div_ceil(1000))
}
