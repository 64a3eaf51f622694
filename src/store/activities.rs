//! Pipeline-activity audit rows
//!
//! Every unit of work (sync, processing, detection, segmentation) opens a
//! row as `running` and closes it as `completed` or `failed`. Rows are
//! append-only and pruned by the daily cleanup task.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use super::models::ActivityStatus;
use crate::error::Result;

/// Open an audit row; returns its id.
pub async fn open(
    pool: &PgPool,
    activity_type: &str,
    activity_name: &str,
    source_name: &str,
    stream_name: Option<&str>,
) -> Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO pipeline_activities
            (id, activity_type, activity_name, source_name, stream_name,
             status, started_at, records_processed, activity_metadata,
             created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, 0, '{}'::jsonb, now(), now())
        "#,
    )
    .bind(id)
    .bind(activity_type)
    .bind(activity_name)
    .bind(source_name)
    .bind(stream_name)
    .bind(ActivityStatus::Running)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(id)
}

/// Close an audit row as completed.
pub async fn complete(
    pool: &PgPool,
    id: Uuid,
    records_processed: i64,
    output_path: Option<&str>,
    metadata: serde_json::Value,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE pipeline_activities
        SET status = $2,
            completed_at = $3,
            records_processed = $4,
            output_path = $5,
            activity_metadata = $6,
            updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(ActivityStatus::Completed)
    .bind(Utc::now())
    .bind(records_processed)
    .bind(output_path)
    .bind(metadata)
    .execute(pool)
    .await?;
    Ok(())
}

/// Close an audit row as failed. The error message is truncated; full
/// detail belongs in the logs.
pub async fn fail(pool: &PgPool, id: Uuid, error_message: &str) -> Result<()> {
    let truncated: String = error_message.chars().take(1000).collect();
    sqlx::query(
        r#"
        UPDATE pipeline_activities
        SET status = $2,
            completed_at = $3,
            error_message = $4,
            updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(ActivityStatus::Failed)
    .bind(Utc::now())
    .bind(truncated)
    .execute(pool)
    .await?;
    Ok(())
}

/// Delete audit rows older than `days`. Returns the number removed.
pub async fn cleanup(pool: &PgPool, days: i64) -> Result<u64> {
    let result = sqlx::query(
        "DELETE FROM pipeline_activities WHERE started_at < now() - make_interval(days => $1::int)",
    )
    .bind(days as i32)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}
