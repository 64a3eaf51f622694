//! Per-stream runtime state: cursor, last ingestion, sync lease
//!
//! The lease column is the per-stream mutex the queue relies on: at most
//! one sync task holds an unexpired lease on a stream row at a time.

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::models::StreamStateRow;
use crate::error::Result;

const STREAM_COLUMNS: &str = "id, stream_name, source_name, is_enabled, cursor, \
     last_ingestion_at, last_successful_sync_at, selected_scopes, lease_expires_at";

pub async fn fetch_by_name(pool: &PgPool, stream_name: &str) -> Result<Option<StreamStateRow>> {
    let row = sqlx::query_as::<_, StreamStateRow>(&format!(
        "SELECT {STREAM_COLUMNS} FROM stream_state WHERE stream_name = $1"
    ))
    .bind(stream_name)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// All enabled stream rows, for scheduled-sync fan-out.
pub async fn fetch_enabled(pool: &PgPool) -> Result<Vec<StreamStateRow>> {
    let rows = sqlx::query_as::<_, StreamStateRow>(&format!(
        "SELECT {STREAM_COLUMNS} FROM stream_state WHERE is_enabled = true ORDER BY stream_name"
    ))
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Try to take the sync lease. Returns false when another worker holds an
/// unexpired lease; the compare-and-set makes this safe under concurrency.
pub async fn acquire_lease(pool: &PgPool, stream_id: Uuid, ttl: Duration) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE stream_state
        SET lease_expires_at = now() + make_interval(secs => $2)
        WHERE id = $1
          AND (lease_expires_at IS NULL OR lease_expires_at < now())
        "#,
    )
    .bind(stream_id)
    .bind(ttl.num_seconds() as f64)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn release_lease(pool: &PgPool, stream_id: Uuid) -> Result<()> {
    sqlx::query("UPDATE stream_state SET lease_expires_at = NULL WHERE id = $1")
        .bind(stream_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Record a successful sync: new cursor (or cleared) and both ingestion
/// timestamps.
pub async fn record_sync_success(
    pool: &PgPool,
    stream_id: Uuid,
    cursor: Option<&str>,
    at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE stream_state
        SET cursor = $2,
            last_ingestion_at = $3,
            last_successful_sync_at = $3,
            updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(stream_id)
    .bind(cursor)
    .bind(at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Drop an upstream-invalidated cursor so the next sync falls back to a
/// date-range window.
pub async fn clear_cursor(pool: &PgPool, stream_id: Uuid) -> Result<()> {
    sqlx::query("UPDATE stream_state SET cursor = NULL, updated_at = now() WHERE id = $1")
        .bind(stream_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Touch `last_ingestion_at` after a push batch lands.
pub async fn record_ingestion(pool: &PgPool, stream_id: Uuid, at: DateTime<Utc>) -> Result<()> {
    sqlx::query(
        "UPDATE stream_state SET last_ingestion_at = $2, updated_at = now() WHERE id = $1",
    )
    .bind(stream_id)
    .bind(at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Disable scheduled runs (set on auth failure until re-auth).
pub async fn disable(pool: &PgPool, stream_id: Uuid) -> Result<()> {
    sqlx::query("UPDATE stream_state SET is_enabled = false, updated_at = now() WHERE id = $1")
        .bind(stream_id)
        .execute(pool)
        .await?;
    Ok(())
}
