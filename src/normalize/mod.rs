//! Normalization and deduplication primitives
//!
//! Every inbound record passes through here on its way to the signals
//! table: timestamps are coerced to UTC, units converted, and the
//! idempotency key derived from the signal's dedup strategy.

pub mod dedup;
pub mod timestamp;
pub mod units;

pub use dedup::idempotency_key;
pub use timestamp::parse_timestamp;
pub use units::convert_unit;

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Stable SHA-256 hash of a JSON value, used for semantic versioning and
/// content-derived dedup suffixes.
///
/// Object keys are serialized in sorted order so two structurally equal
/// payloads always hash the same.
pub fn content_hash(value: &Value) -> String {
    let mut hasher = Sha256::new();
    hash_value(value, &mut hasher);
    hex::encode(hasher.finalize())
}

fn hash_value(value: &Value, hasher: &mut Sha256) {
    match value {
        Value::Null => hasher.update(b"null"),
        Value::Bool(b) => hasher.update(if *b { b"true" as &[u8] } else { b"false" }),
        Value::Number(n) => hasher.update(n.to_string().as_bytes()),
        Value::String(s) => {
            hasher.update(b"\"");
            hasher.update(s.as_bytes());
            hasher.update(b"\"");
        }
        Value::Array(items) => {
            hasher.update(b"[");
            for item in items {
                hash_value(item, hasher);
                hasher.update(b",");
            }
            hasher.update(b"]");
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            hasher.update(b"{");
            for key in keys {
                hasher.update(key.as_bytes());
                hasher.update(b":");
                hash_value(&map[key], hasher);
                hasher.update(b",");
            }
            hasher.update(b"}");
        }
    }
}

/// Coerce a JSON value to f64, tolerating string-encoded numbers.
pub fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_content_hash_is_key_order_independent() {
        let a = json!({"b": 2, "a": 1});
        let b = json!({"a": 1, "b": 2});
        assert_eq!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn test_content_hash_distinguishes_values() {
        let a = json!({"a": 1});
        let b = json!({"a": 2});
        assert_ne!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn test_numeric_coercion() {
        assert_eq!(numeric(&json!(1.5)), Some(1.5));
        assert_eq!(numeric(&json!("2.25")), Some(2.25));
        assert_eq!(numeric(&json!("n/a")), None);
        assert_eq!(numeric(&json!(null)), None);
    }
}
