//! Shared helpers for upstream timestamps and unit conversion.
//!
//! CWMS reports times either as epoch milliseconds or as ISO 8601 strings
//! depending on the endpoint; weather.gov may report °C for some grids even
//! though the dashboard is fixed to English units.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

/// Parse an upstream timestamp that is either epoch milliseconds (number) or
/// an RFC 3339 string. Returns `None` for anything else.
pub(crate) fn parse_upstream_timestamp(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok(),
        _ => None,
    }
}

/// Format a timestamp the way every `lastUpdated` field is emitted.
pub(crate) fn iso8601(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a `lastUpdated`-style string back into UTC.
pub(crate) fn parse_iso8601(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

pub(crate) fn celsius_to_fahrenheit(c: f64) -> f64 {
    c * 9.0 / 5.0 + 32.0
}
