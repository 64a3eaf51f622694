//! Day-segment (event) persistence

use chrono::NaiveDate;
use sqlx::PgPool;
use uuid::Uuid;

use super::models::{EventRow, NewEvent};
use crate::error::Result;

/// Replace all of a date's segments atomically: delete-then-insert in a
/// single transaction so readers never observe a partial day.
pub async fn replace_day(pool: &PgPool, date: NaiveDate, events: &[NewEvent]) -> Result<u64> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM events WHERE date = $1")
        .bind(date)
        .execute(&mut *tx)
        .await?;

    let mut stored = 0u64;
    for event in events {
        sqlx::query(
            r#"
            INSERT INTO events
                (id, date, cluster_id, start_time, end_time, event_type,
                 core_density, transition_ids, signal_contributions,
                 event_metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, now())
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(event.date)
        .bind(event.cluster_id)
        .bind(event.start_time)
        .bind(event.end_time)
        .bind(event.event_type)
        .bind(event.core_density)
        .bind(serde_json::to_value(&event.transition_ids)?)
        .bind(&event.signal_contributions)
        .bind(&event.event_metadata)
        .execute(&mut *tx)
        .await?;
        stored += 1;
    }

    tx.commit().await?;
    Ok(stored)
}

/// A date's segments in start-time order.
pub async fn fetch_day(pool: &PgPool, date: NaiveDate) -> Result<Vec<EventRow>> {
    let rows = sqlx::query_as::<_, EventRow>(
        r#"
        SELECT id, date, cluster_id, start_time, end_time, event_type,
               core_density, transition_ids, signal_contributions, event_metadata
        FROM events
        WHERE date = $1
        ORDER BY start_time ASC
        "#,
    )
    .bind(date)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
