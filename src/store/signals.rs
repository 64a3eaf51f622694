//! Signal-record persistence
//!
//! The unique constraint on (source_name, signal_name, idempotency_key)
//! carries the ingestion idempotency contract: re-processing a batch
//! updates mutable fields in place and never duplicates a row.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

use super::models::{NewSignalRecord, SignalRecordRow};
use crate::error::Result;

/// Insert-or-update a batch of records inside one transaction.
///
/// Returns the per-signal count of rows written (inserted or updated).
pub async fn upsert_signals(
    pool: &PgPool,
    records: &[NewSignalRecord],
) -> Result<HashMap<String, u64>> {
    let mut written: HashMap<String, u64> = HashMap::new();
    if records.is_empty() {
        return Ok(written);
    }

    let mut tx = pool.begin().await?;

    for record in records {
        sqlx::query(
            r#"
            INSERT INTO signals
                (id, signal_name, source_name, timestamp, signal_value,
                 confidence, idempotency_key, latitude, longitude,
                 source_metadata, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, now(), now())
            ON CONFLICT (source_name, signal_name, idempotency_key)
            DO UPDATE SET
                timestamp = EXCLUDED.timestamp,
                signal_value = EXCLUDED.signal_value,
                confidence = EXCLUDED.confidence,
                source_metadata = EXCLUDED.source_metadata,
                updated_at = now()
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&record.signal_name)
        .bind(&record.source_name)
        .bind(record.timestamp)
        .bind(&record.signal_value)
        .bind(record.confidence)
        .bind(&record.idempotency_key)
        .bind(record.latitude)
        .bind(record.longitude)
        .bind(&record.source_metadata)
        .execute(&mut *tx)
        .await?;

        *written.entry(record.signal_name.clone()).or_default() += 1;
    }

    tx.commit().await?;
    Ok(written)
}

/// Fetch one signal's records in a window, sorted by timestamp.
pub async fn fetch_window(
    pool: &PgPool,
    signal_name: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<SignalRecordRow>> {
    let rows = sqlx::query_as::<_, SignalRecordRow>(
        r#"
        SELECT id, signal_name, source_name, timestamp, signal_value,
               confidence, idempotency_key, latitude, longitude, source_metadata
        FROM signals
        WHERE signal_name = $1
          AND timestamp >= $2
          AND timestamp <= $3
        ORDER BY timestamp ASC
        "#,
    )
    .bind(signal_name)
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Time envelope [tmin, tmax] of a set of records.
pub fn time_envelope(records: &[NewSignalRecord]) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let mut range: Option<(DateTime<Utc>, DateTime<Utc>)> = None;
    for record in records {
        range = Some(match range {
            None => (record.timestamp, record.timestamp),
            Some((min, max)) => (min.min(record.timestamp), max.max(record.timestamp)),
        });
    }
    range
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::timestamp::parse_timestamp_str;
    use serde_json::json;

    fn record(signal: &str, ts: &str) -> NewSignalRecord {
        NewSignalRecord {
            signal_name: signal.into(),
            source_name: "ios".into(),
            timestamp: parse_timestamp_str(ts).unwrap(),
            signal_value: "1.0".into(),
            confidence: 0.9,
            idempotency_key: ts.into(),
            latitude: None,
            longitude: None,
            source_metadata: json!({}),
        }
    }

    #[test]
    fn test_time_envelope_spans_records() {
        let records = vec![
            record("ios_speed", "2025-05-03T14:05:00Z"),
            record("ios_speed", "2025-05-03T14:00:00Z"),
            record("ios_speed", "2025-05-03T14:10:00Z"),
        ];
        let (tmin, tmax) = time_envelope(&records).unwrap();
        assert_eq!(tmin, parse_timestamp_str("2025-05-03T14:00:00Z").unwrap());
        assert_eq!(tmax, parse_timestamp_str("2025-05-03T14:10:00Z").unwrap());
    }

    #[test]
    fn test_time_envelope_empty() {
        assert!(time_envelope(&[]).is_none());
    }
}
