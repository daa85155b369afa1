//! Diagnostic tracing and secret redaction for everything changegate writes
//! outside the process (audit log, trace lines, CLI JSON).

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

pub const TRACE_ENV: &str = "CHANGEGATE_PIPELINE_TRACE";

/// `(pattern, replacement)` pairs applied in order.
static REDACTIONS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (
            Regex::new(r"-----BEGIN (?:RSA |DSA |EC |OPENSSH )?PRIVATE KEY-----[\s\S]*?-----END (?:RSA |DSA |EC |OPENSSH )?PRIVATE KEY-----").unwrap(),
            "[PEM_KEY_REDACTED]",
        ),
        (
            Regex::new(r"(A3T[A-Z0-9]|AKIA|AGPA|AIDA|AROA|AIPA|ANPA|ANVA|ASIA)[0-9A-Z]{16}").unwrap(),
            "[AWS_KEY_REDACTED]",
        ),
        (
            Regex::new(r"(ghp|gho|ghu|ghs|ghr)_[a-zA-Z0-9_]{36,255}").unwrap(),
            "[GITHUB_TOKEN_REDACTED]",
        ),
        (
            Regex::new(r"\b(?:sk|pk|rk)[-_](?:live|test)[-_][A-Za-z0-9]{16,}|\bsk-[A-Za-z0-9_-]{20,}").unwrap(),
            "[PROVIDER_KEY_REDACTED]",
        ),
        (
            Regex::new(r"(?i)bearer\s+[a-zA-Z0-9_\-\.]{20,}").unwrap(),
            "[BEARER_REDACTED]",
        ),
        (
            Regex::new(r#"(?i)(postgres|mysql|mongodb|redis)://[^\s'"]+:[^\s'"]+@[^\s'"]+"#).unwrap(),
            "[CONNECTION_STRING_REDACTED]",
        ),
        (
            Regex::new(r#"(?i)(password|passwd|pwd)['"]?\s*[:=]\s*['"]?[^\s'"]{8,}['"]?"#).unwrap(),
            "[PASSWORD_REDACTED]",
        ),
    ]
});

/// True when `CHANGEGATE_PIPELINE_TRACE=1`.
pub fn trace_enabled() -> bool {
    std::env::var(TRACE_ENV).ok().as_deref() == Some("1")
}

/// Print a single diagnostic line when tracing is enabled.
pub fn trace(message: &str) {
    if trace_enabled() {
        eprintln!("changegate: trace {}", redact_string(message));
    }
}

pub fn redact_string(input: &str) -> String {
    let mut result = input.to_string();
    for (pattern, replacement) in REDACTIONS.iter() {
        if pattern.is_match(&result) {
            result = pattern.replace_all(&result, *replacement).to_string();
        }
    }
    result
}

fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    ["token", "secret", "password", "api_key", "apikey", "authorization"]
        .iter()
        .any(|needle| lower.contains(needle))
}

/// Recursively redact a JSON value: sensitive keys are replaced wholesale,
/// string values are scanned for secret-shaped content.
pub fn redact(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, val) in map {
                if is_sensitive_key(&key) {
                    out.insert(key, Value::String("[REDACTED]".to_string()));
                } else {
                    out.insert(key, redact(val));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(redact).collect()),
        Value::String(s) => Value::String(redact_string(&s)),
        other => other,
    }
}
