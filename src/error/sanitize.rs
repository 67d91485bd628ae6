//! Redaction of sensitive fields in error context.
//!
//! # Responsibilities
//! - Detect sensitive keys (phone, email, tokens, credentials)
//! - Replace their values before the context is logged or returned
//!
//! # Design Decisions
//! - Key-based matching, case and separator insensitive
//! - Nested objects and arrays are walked recursively

use serde_json::Value;
use std::collections::BTreeMap;

/// Replacement written in place of a redacted value.
pub const REDACTED: &str = "[REDACTED]";

const SENSITIVE_MARKERS: &[&str] = &[
    "phone",
    "email",
    "token",
    "password",
    "passwd",
    "secret",
    "authorization",
    "apikey",
    "api_key",
    "cookie",
    "session",
    "card_number",
    "cardnumber",
    "ssn",
];

/// Whether a context key names sensitive data.
pub fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase().replace('-', "_");
    SENSITIVE_MARKERS.iter().any(|marker| key.contains(marker))
}

/// Redact every sensitive key found anywhere inside `value`.
pub fn sanitize_value(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| {
                    if is_sensitive_key(&key) {
                        (key, Value::String(REDACTED.to_string()))
                    } else {
                        (key, sanitize_value(value))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize_value).collect()),
        other => other,
    }
}

/// Sanitize a single key/value pair.
pub fn sanitize_entry(key: &str, value: Value) -> Value {
    if is_sensitive_key(key) {
        Value::String(REDACTED.to_string())
    } else {
        sanitize_value(value)
    }
}

/// Sanitize a flat map of context values.
pub fn sanitize_map(map: BTreeMap<String, Value>) -> BTreeMap<String, Value> {
    map.into_iter()
        .map(|(key, value)| {
            let value = sanitize_entry(&key, value);
            (key, value)
        })
        .collect()
}
