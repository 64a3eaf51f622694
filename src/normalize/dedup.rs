//! Deterministic idempotency-key generation
//!
//! The key uniquely identifies one observation within
//! (source_name, signal_name). Re-processing the same raw batch must
//! regenerate the exact same keys, which is what makes ingestion
//! idempotent.

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{content_hash, timestamp::key_format};
use crate::registry::DedupStrategy;

/// Derive the idempotency key for one record.
///
/// `single` signals permit one value per timestamp, so the timestamp alone
/// is the key. `multiple` signals (overlapping events) append a stable
/// content identifier: the record's own id when it carries one, otherwise
/// a truncated content hash.
pub fn idempotency_key(
    strategy: DedupStrategy,
    timestamp: &DateTime<Utc>,
    record: &Value,
) -> String {
    match strategy {
        DedupStrategy::Single => key_format(timestamp),
        DedupStrategy::Multiple => {
            let suffix = record_identifier(record)
                .unwrap_or_else(|| content_hash(record)[..8].to_string());
            format!("{}:{}", key_format(timestamp), suffix)
        }
    }
}

/// Pull a unique identifier out of a record, preferring explicit ids.
fn record_identifier(record: &Value) -> Option<String> {
    for key in ["event_id", "id", "uuid"] {
        if let Some(Value::String(s)) = record.get(key) {
            if !s.is_empty() {
                return Some(s.clone());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::timestamp::parse_timestamp_str;
    use serde_json::json;

    #[test]
    fn test_single_key_is_timestamp_only() {
        let ts = parse_timestamp_str("2025-05-03T14:00:00Z").unwrap();
        let key = idempotency_key(DedupStrategy::Single, &ts, &json!({"speed": 1.4}));
        assert_eq!(key, "2025-05-03T14:00:00+00:00");
    }

    #[test]
    fn test_multiple_key_appends_event_id() {
        let ts = parse_timestamp_str("2025-05-03T14:00:00Z").unwrap();
        let key = idempotency_key(
            DedupStrategy::Multiple,
            &ts,
            &json!({"event_id": "e1", "summary": "standup"}),
        );
        assert_eq!(key, "2025-05-03T14:00:00+00:00:e1");
    }

    #[test]
    fn test_multiple_key_without_id_hashes_content() {
        let ts = parse_timestamp_str("2025-05-03T14:00:00Z").unwrap();
        let a = idempotency_key(DedupStrategy::Multiple, &ts, &json!({"title": "walk"}));
        let b = idempotency_key(DedupStrategy::Multiple, &ts, &json!({"title": "run"}));
        let a_again = idempotency_key(DedupStrategy::Multiple, &ts, &json!({"title": "walk"}));
        assert_ne!(a, b);
        assert_eq!(a, a_again);
        assert!(a.starts_with("2025-05-03T14:00:00+00:00:"));
    }
}
