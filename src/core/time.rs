//! Shared timestamp/id helpers.

use chrono::{SecondsFormat, Utc};
use ulid::Ulid;

/// ISO-8601 UTC timestamp with millisecond precision.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn new_id() -> String {
    Ulid::new().to_string()
}

/// Prefixed id, e.g. `plan_01J...`.
pub fn new_prefixed_id(prefix: &str) -> String {
    format!("{}_{}", prefix, Ulid::new())
}
