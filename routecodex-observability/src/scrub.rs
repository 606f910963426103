//! Credential scrubbing for snapshot payloads.
//!
//! Snapshots leave the process through a configurable sink; nothing that
//! can authenticate a request may leave with them.

use serde_json::Value;

/// Replacement string used for all masked values.
pub const REDACTED: &str = "[REDACTED]";

/// Headers that are always masked, regardless of configuration. These
/// carry credentials or session material and must never appear in
/// plaintext snapshots.
pub const ALWAYS_SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "cookie",
    "set-cookie",
    "x-api-key",
    "x-goog-api-key",
    "x-auth-token",
    "proxy-authorization",
    "x-iflow-signature",
];

/// Body keys whose values are masked wherever they appear.
const SENSITIVE_BODY_KEYS: &[&str] = &["api_key", "apikey", "token", "access_token", "secret"];

/// Mask a single header value if the name is sensitive. Returns
/// `(masked_value, was_scrubbed)`.
pub fn scrub_header(name: &str, value: &str, extra: &[String]) -> (String, bool) {
    let lower = name.to_lowercase();
    let is_sensitive = ALWAYS_SENSITIVE_HEADERS.contains(&lower.as_str())
        || extra.iter().any(|e| e.to_lowercase() == lower);
    if is_sensitive {
        (REDACTED.to_string(), true)
    } else {
        (value.to_string(), false)
    }
}

/// Scrub a header list in place, returning how many values were masked.
pub fn scrub_headers(headers: &mut [(String, String)], extra: &[String]) -> usize {
    let mut count = 0;
    for (name, value) in headers.iter_mut() {
        let (masked, scrubbed) = scrub_header(name, value, extra);
        if scrubbed {
            *value = masked;
            count += 1;
        }
    }
    count
}

/// Recursively mask sensitive keys in a JSON body.
pub fn scrub_body(body: &mut Value) {
    match body {
        Value::Object(map) => {
            for (key, value) in map.iter_mut() {
                if SENSITIVE_BODY_KEYS.contains(&key.to_lowercase().as_str()) {
                    *value = Value::String(REDACTED.to_string());
                } else {
                    scrub_body(value);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                scrub_body(item);
            }
        }
        _ => {}
    }
}
