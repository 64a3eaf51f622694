//! Transition persistence
//!
//! Detection handlers replace a window before re-inserting, so a
//! re-detected window never leaves stale rows behind; inserts upsert on
//! (source, signal, time, type, direction).

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::models::{NewTransition, TransitionRow};
use crate::error::Result;

/// Delete a signal's transitions in [start, end] and insert the new set,
/// in one transaction. Returns the number stored.
pub async fn replace_window(
    pool: &PgPool,
    signal_name: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    transitions: &[NewTransition],
) -> Result<u64> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "DELETE FROM signal_transitions
         WHERE signal_name = $1 AND transition_time >= $2 AND transition_time <= $3",
    )
    .bind(signal_name)
    .bind(start)
    .bind(end)
    .execute(&mut *tx)
    .await?;

    let mut stored = 0u64;
    for t in transitions {
        sqlx::query(
            r#"
            INSERT INTO signal_transitions
                (id, source_name, signal_name, transition_time, transition_type,
                 direction, before_mean, before_std, after_mean, after_std,
                 magnitude, confidence, detection_method, transition_metadata,
                 created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, now())
            ON CONFLICT (source_name, signal_name, transition_time, transition_type, direction)
            DO UPDATE SET
                before_mean = EXCLUDED.before_mean,
                before_std = EXCLUDED.before_std,
                after_mean = EXCLUDED.after_mean,
                after_std = EXCLUDED.after_std,
                magnitude = EXCLUDED.magnitude,
                confidence = EXCLUDED.confidence,
                detection_method = EXCLUDED.detection_method,
                transition_metadata = EXCLUDED.transition_metadata
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&t.source_name)
        .bind(&t.signal_name)
        .bind(t.transition_time)
        .bind(t.transition_type)
        .bind(t.direction)
        .bind(t.before_mean)
        .bind(t.before_std)
        .bind(t.after_mean)
        .bind(t.after_std)
        .bind(t.magnitude)
        .bind(t.confidence)
        .bind(&t.detection_method)
        .bind(&t.transition_metadata)
        .execute(&mut *tx)
        .await?;
        stored += 1;
    }

    tx.commit().await?;
    Ok(stored)
}

/// All transitions in a UTC window, sorted by time.
pub async fn fetch_window(
    pool: &PgPool,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<TransitionRow>> {
    let rows = sqlx::query_as::<_, TransitionRow>(
        r#"
        SELECT id, source_name, signal_name, transition_time, transition_type,
               direction, before_mean, before_std, after_mean, after_std,
               magnitude, confidence, detection_method, transition_metadata
        FROM signal_transitions
        WHERE transition_time >= $1 AND transition_time <= $2
        ORDER BY transition_time ASC
        "#,
    )
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
