//! Response classification into [`AppError`]
//!
//! Precedence:
//! 1. A backend-declared code in the body, normalized into the taxonomy
//! 2. The status table ([`ErrorKind::from_status`])
//! 3. Step-up override: a reauth-like body code, `X-Reauth-Required`, or a
//!    `WWW-Authenticate` challenge asking for stronger authentication forces
//!    `need_step_up` whatever 1 and 2 produced
//!
//! `request_id` and `retry_after` are attached whenever the headers carry
//! them. Bodies that are not JSON objects are tolerated and ignored.

use authflow_domain::constants::{
    HEADER_REAUTH_REQUIRED, HEADER_STEP_UP_CHALLENGE_ID, HEADER_STEP_UP_EXPIRES_AT,
    HEADER_STEP_UP_HINT, HEADER_STEP_UP_METHOD, HEADER_WWW_AUTHENTICATE,
};
use authflow_domain::{AppError, ErrorKind, StepUpMeta};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::HeaderMap;
use serde_json::{Map, Value};

use super::headers::{header_str, parse_retry_after, request_id};

const CODE_FIELDS: &[&str] = &["code", "error_code", "error"];
const MESSAGE_FIELDS: &[&str] = &["message", "error_description", "detail"];
const INSUFFICIENT_AUTH: &str = "insufficient_user_authentication";

// auth-param = token "=" ( token / quoted-string )
static AUTH_PARAM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([A-Za-z0-9_\-]+)\s*=\s*(?:"((?:[^"\\]|\\.)*)"|([^\s,]+))"#)
        .expect("AUTH_PARAM should compile - this is a bug")
});

/// Classify a non-success response.
pub fn classify(status: u16, headers: &HeaderMap, body: &[u8]) -> AppError {
    let parsed = ErrorBody::parse(body);
    let challenge = Challenge::parse(header_str(headers, HEADER_WWW_AUTHENTICATE));

    let code = match parsed.code.as_deref() {
        Some(code) => ErrorKind::from_backend_code(code),
        None => ErrorKind::from_status(status),
    };

    let mut error = AppError::new(code)
        .with_status(status)
        .with_request_id(request_id(headers))
        .with_retry_after(parse_retry_after(headers));
    if let Some(message) = parsed.message {
        error = error.with_message(message);
    }

    let step_up = code == ErrorKind::NeedStepUp
        || header_flag(headers, HEADER_REAUTH_REQUIRED)
        || challenge.requests_step_up();
    if step_up {
        let mut meta = parsed.step_up;
        meta.merge_missing(header_meta(headers));
        meta.merge_missing(challenge.meta());
        error.code = ErrorKind::NeedStepUp;
        error.meta = Some(meta);
    }

    error
}

/// Fields pulled out of an error body.
#[derive(Debug, Default)]
struct ErrorBody {
    code: Option<String>,
    message: Option<String>,
    step_up: StepUpMeta,
}

impl ErrorBody {
    fn parse(body: &[u8]) -> Self {
        let Ok(Value::Object(root)) = serde_json::from_slice::<Value>(body) else {
            return Self::default();
        };
        let nested = root.get("error").and_then(Value::as_object);

        let code = string_field(&root, CODE_FIELDS)
            .or_else(|| nested.and_then(|n| string_field(n, CODE_FIELDS)));
        let message = string_field(&root, MESSAGE_FIELDS)
            .or_else(|| nested.and_then(|n| string_field(n, MESSAGE_FIELDS)));

        let mut step_up = ["step_up", "stepUp"]
            .iter()
            .find_map(|key| root.get(*key).and_then(Value::as_object))
            .map(meta_from_object)
            .unwrap_or_default();
        step_up.merge_missing(meta_from_object(&root));
        if let Some(nested) = nested {
            step_up.merge_missing(meta_from_object(nested));
        }

        Self { code, message, step_up }
    }
}

fn string_field(object: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| scalar(object.get(*key)?))
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn meta_from_object(object: &Map<String, Value>) -> StepUpMeta {
    StepUpMeta {
        hint: string_field(object, &["hint", "step_up_hint"]),
        challenge_id: string_field(object, &["challenge_id", "challengeId"]),
        expires_at: string_field(object, &["expires_at", "expiresAt"]),
        method: string_field(object, &["method", "step_up_method"]),
    }
}

fn header_flag(headers: &HeaderMap, name: &str) -> bool {
    header_str(headers, name)
        .is_some_and(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
}

fn header_meta(headers: &HeaderMap) -> StepUpMeta {
    let get = |name: &str| header_str(headers, name).map(str::to_string);
    StepUpMeta {
        hint: get(HEADER_STEP_UP_HINT),
        challenge_id: get(HEADER_STEP_UP_CHALLENGE_ID),
        expires_at: get(HEADER_STEP_UP_EXPIRES_AT),
        method: get(HEADER_STEP_UP_METHOD),
    }
}

/// Parsed `WWW-Authenticate` challenge.
#[derive(Debug, Default)]
struct Challenge {
    raw: String,
    params: Vec<(String, String)>,
}

impl Challenge {
    fn parse(header: Option<&str>) -> Self {
        let Some(raw) = header else {
            return Self::default();
        };
        let params = AUTH_PARAM
            .captures_iter(raw)
            .filter_map(|caps| {
                let name = caps.get(1)?.as_str().to_ascii_lowercase();
                let value = caps.get(2).or_else(|| caps.get(3))?.as_str().replace("\\\"", "\"");
                Some((name, value))
            })
            .collect();
        Self { raw: raw.to_ascii_lowercase(), params }
    }

    fn param(&self, name: &str) -> Option<String> {
        self.params.iter().find(|(key, _)| key == name).map(|(_, value)| value.clone())
    }

    fn requests_step_up(&self) -> bool {
        if self.raw.is_empty() {
            return false;
        }
        if self.raw.contains(INSUFFICIENT_AUTH) {
            return true;
        }
        let marker = |s: &str| {
            let s = s.to_ascii_lowercase().replace('-', "_");
            s.contains("step_up") || s.contains("stepup") || s.contains("reauth")
        };
        self.raw.split_whitespace().next().is_some_and(marker)
            || self.params.iter().any(|(key, value)| marker(key) || (key == "error" && marker(value)))
    }

    fn meta(&self) -> StepUpMeta {
        StepUpMeta {
            hint: self.param("hint").or_else(|| self.param("error_description")),
            challenge_id: self.param("challenge_id"),
            expires_at: self.param("expires_at"),
            method: self.param("method").or_else(|| self.param("acr_values")),
        }
    }
}
