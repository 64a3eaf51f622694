//! Timestamp normalization
//!
//! Device payloads carry timestamps as RFC 3339 strings, Unix seconds, or
//! Unix milliseconds depending on the client build. Everything is coerced
//! to `DateTime<Utc>` here; nothing downstream does timezone math.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

use crate::error::{Error, Result};

/// Unix values above this are treated as milliseconds.
const MILLIS_CUTOFF: f64 = 1e10;

/// Parse a timestamp from any of the accepted wire encodings.
pub fn parse_timestamp(value: &Value) -> Result<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_timestamp_str(s),
        Value::Number(n) => {
            let raw = n
                .as_f64()
                .ok_or_else(|| Error::Validation(format!("non-finite timestamp: {n}")))?;
            Ok(from_unix(raw))
        }
        other => Err(Error::Validation(format!(
            "cannot interpret timestamp: {other}"
        ))),
    }
}

/// Parse a timestamp string: RFC 3339, bare `YYYY-MM-DD HH:MM:SS` (assumed
/// UTC), or a stringified Unix value.
pub fn parse_timestamp_str(s: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(naive.and_utc());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Ok(naive.and_utc());
    }

    if let Ok(raw) = s.parse::<f64>() {
        return Ok(from_unix(raw));
    }

    Err(Error::Validation(format!("unparseable timestamp: {s}")))
}

fn from_unix(raw: f64) -> DateTime<Utc> {
    let seconds = if raw.abs() > MILLIS_CUTOFF {
        raw / 1000.0
    } else {
        raw
    };
    let secs = seconds.trunc() as i64;
    let nanos = ((seconds - seconds.trunc()) * 1e9) as u32;
    Utc.timestamp_opt(secs, nanos)
        .single()
        .unwrap_or_else(Utc::now)
}

/// RFC 3339 with explicit offset, the canonical idempotency-key spelling.
///
/// `+00:00` is used rather than `Z` so keys match across producers.
pub fn key_format(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rfc3339() {
        let ts = parse_timestamp(&json!("2025-05-03T14:00:00Z")).unwrap();
        assert_eq!(ts.to_rfc3339(), "2025-05-03T14:00:00+00:00");
    }

    #[test]
    fn test_rfc3339_with_offset() {
        let ts = parse_timestamp(&json!("2025-05-03T16:00:00+02:00")).unwrap();
        assert_eq!(ts.to_rfc3339(), "2025-05-03T14:00:00+00:00");
    }

    #[test]
    fn test_unix_seconds() {
        let ts = parse_timestamp(&json!(1746280800)).unwrap();
        assert_eq!(ts.to_rfc3339(), "2025-05-03T14:00:00+00:00");
    }

    #[test]
    fn test_unix_millis_autodetected() {
        let ts = parse_timestamp(&json!(1746280800000i64)).unwrap();
        assert_eq!(ts.to_rfc3339(), "2025-05-03T14:00:00+00:00");
    }

    #[test]
    fn test_bare_datetime_assumed_utc() {
        let ts = parse_timestamp_str("2025-05-03 14:00:00").unwrap();
        assert_eq!(ts.to_rfc3339(), "2025-05-03T14:00:00+00:00");
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(parse_timestamp(&json!("soon")).is_err());
        assert!(parse_timestamp(&json!({"at": 1})).is_err());
    }

    #[test]
    fn test_key_format_uses_explicit_offset() {
        let ts = parse_timestamp(&json!("2025-05-03T14:00:00Z")).unwrap();
        assert_eq!(key_format(&ts), "2025-05-03T14:00:00+00:00");
    }
}
