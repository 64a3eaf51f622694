//! Semantic-record persistence
//!
//! A semantic record is a versioned document: the latest row per
//! (source_name, semantic_id) carries `is_latest = true`. A content-hash
//! change flips that flag and inserts version + 1.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::models::SemanticRow;
use crate::error::Result;

/// Input for one semantic upsert.
#[derive(Debug, Clone)]
pub struct SemanticUpsert {
    pub source_name: String,
    pub semantic_name: String,
    pub semantic_id: String,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub content_hash: String,
    pub body_path: String,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of a semantic upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemanticOutcome {
    Inserted,
    Versioned,
    Unchanged,
}

/// Compare against the latest version; on hash change flip `is_latest` and
/// insert the next version. Idempotent for identical content.
pub async fn upsert_semantic(pool: &PgPool, doc: &SemanticUpsert) -> Result<SemanticOutcome> {
    let mut tx = pool.begin().await?;

    let latest = sqlx::query_as::<_, (Uuid, i32, String)>(
        r#"
        SELECT id, version, content_hash
        FROM semantics
        WHERE source_name = $1 AND semantic_id = $2 AND is_latest = true
        FOR UPDATE
        "#,
    )
    .bind(&doc.source_name)
    .bind(&doc.semantic_id)
    .fetch_optional(&mut *tx)
    .await?;

    let (version, outcome) = match latest {
        Some((_, _, ref hash)) if *hash == doc.content_hash => {
            tx.commit().await?;
            return Ok(SemanticOutcome::Unchanged);
        }
        Some((id, version, _)) => {
            sqlx::query("UPDATE semantics SET is_latest = false WHERE id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            (version + 1, SemanticOutcome::Versioned)
        }
        None => (1, SemanticOutcome::Inserted),
    };

    sqlx::query(
        r#"
        INSERT INTO semantics
            (id, source_name, semantic_name, semantic_id, version, is_latest,
             title, summary, content_hash, body_path, updated_at, created_at)
        VALUES ($1, $2, $3, $4, $5, true, $6, $7, $8, $9, $10, now())
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&doc.source_name)
    .bind(&doc.semantic_name)
    .bind(&doc.semantic_id)
    .bind(version)
    .bind(&doc.title)
    .bind(&doc.summary)
    .bind(&doc.content_hash)
    .bind(&doc.body_path)
    .bind(doc.updated_at)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(outcome)
}

/// Latest version of one document.
pub async fn fetch_latest(
    pool: &PgPool,
    source_name: &str,
    semantic_id: &str,
) -> Result<Option<SemanticRow>> {
    let row = sqlx::query_as::<_, SemanticRow>(
        r#"
        SELECT id, source_name, semantic_name, semantic_id, version, is_latest,
               title, summary, content_hash, body_path, updated_at
        FROM semantics
        WHERE source_name = $1 AND semantic_id = $2 AND is_latest = true
        "#,
    )
    .bind(source_name)
    .bind(semantic_id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}
