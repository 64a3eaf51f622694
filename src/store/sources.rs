//! Source-row access: connection state and stored OAuth tokens

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::models::SourceRow;
use crate::error::{Error, Result};

const SOURCE_COLUMNS: &str = "id, source_name, is_active, device_token, \
     oauth_access_token, oauth_refresh_token, oauth_expires_at, scopes";

/// Active connection row for a source name.
pub async fn fetch_active(pool: &PgPool, source_name: &str) -> Result<Option<SourceRow>> {
    let row = sqlx::query_as::<_, SourceRow>(&format!(
        "SELECT {SOURCE_COLUMNS} FROM sources WHERE source_name = $1 AND is_active = true LIMIT 1"
    ))
    .bind(source_name)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Source row whose device token matches, for push authentication.
pub async fn fetch_by_device_token(pool: &PgPool, device_token: &str) -> Result<Option<SourceRow>> {
    let row = sqlx::query_as::<_, SourceRow>(&format!(
        "SELECT {SOURCE_COLUMNS} FROM sources WHERE device_token = $1 AND is_active = true LIMIT 1"
    ))
    .bind(device_token)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Persist refreshed OAuth tokens atomically.
pub async fn update_tokens(
    pool: &PgPool,
    source_id: Uuid,
    access_token: &str,
    refresh_token: Option<&str>,
    expires_at: Option<DateTime<Utc>>,
) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE sources
        SET oauth_access_token = $2,
            oauth_refresh_token = COALESCE($3, oauth_refresh_token),
            oauth_expires_at = $4,
            updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(source_id)
    .bind(access_token)
    .bind(refresh_token)
    .bind(expires_at)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::Database(format!("Source not found: {source_id}")));
    }
    Ok(())
}

/// Cloud sources whose access token expires within `horizon`.
pub async fn fetch_expiring(pool: &PgPool, horizon: Duration) -> Result<Vec<SourceRow>> {
    let cutoff = Utc::now() + horizon;
    let rows = sqlx::query_as::<_, SourceRow>(&format!(
        r#"
        SELECT {SOURCE_COLUMNS} FROM sources
        WHERE is_active = true
          AND oauth_refresh_token IS NOT NULL
          AND oauth_expires_at IS NOT NULL
          AND oauth_expires_at <= $1
        ORDER BY oauth_expires_at ASC
        "#
    ))
    .bind(cutoff)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Deactivate a source on explicit disconnect.
pub async fn deactivate(pool: &PgPool, source_name: &str) -> Result<()> {
    sqlx::query("UPDATE sources SET is_active = false, updated_at = now() WHERE source_name = $1")
        .bind(source_name)
        .execute(pool)
        .await?;
    Ok(())
}
