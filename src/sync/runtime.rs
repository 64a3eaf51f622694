//! The sync runtime: orchestrates one pull-stream sync end to end

use chrono::{Duration, Utc};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;

use super::backoff::Backoff;
use super::syncer::{SyncContext, SyncWindow, SyncerRun};
use crate::error::{Error, Result};
use crate::oauth::TokenManager;
use crate::registry::{AuthType, IngestionType, Registry};
use crate::storage::Storage;
use crate::store::models::StreamStateRow;
use crate::store::{activities, streams};

/// Sync lease duration; matches the sync task deadline.
const LEASE: Duration = Duration::minutes(15);

/// Result of one `sync_stream` invocation.
#[derive(Debug)]
pub enum SyncOutcome {
    Completed {
        records_processed: usize,
        next_cursor: Option<String>,
        batch_keys: Vec<String>,
        scope_errors: Vec<String>,
    },
    Skipped {
        reason: &'static str,
    },
}

pub struct SyncRuntime {
    db: PgPool,
    storage: Storage,
    registry: Arc<Registry>,
    tokens: Arc<TokenManager>,
    http: reqwest::Client,
    backoff: Backoff,
}

impl SyncRuntime {
    pub fn new(
        db: PgPool,
        storage: Storage,
        registry: Arc<Registry>,
        tokens: Arc<TokenManager>,
    ) -> Self {
        Self {
            db,
            storage,
            registry,
            tokens,
            http: reqwest::Client::new(),
            backoff: Backoff::default(),
        }
    }

    /// Sync one pull stream. Idempotent modulo concurrent runs on the
    /// same stream: the row lease rejects overlap.
    #[tracing::instrument(skip(self), fields(stream = %stream_name, manual))]
    pub async fn sync_stream(&self, stream_name: &str, manual: bool) -> Result<SyncOutcome> {
        let stream = self
            .registry
            .stream(stream_name)
            .ok_or_else(|| Error::StreamNotFound(stream_name.to_string()))?
            .clone();

        // Push streams sync only on explicit manual request
        if stream.ingestion_type == IngestionType::Push && !manual {
            return Ok(SyncOutcome::Skipped {
                reason: "push_stream",
            });
        }

        let Some(syncer_key) = stream.syncer.clone() else {
            // No pull implementation; the stream is push-only
            return Ok(SyncOutcome::Skipped {
                reason: "no_syncer",
            });
        };

        let state = streams::fetch_by_name(&self.db, stream_name)
            .await?
            .ok_or_else(|| Error::StreamNotFound(stream_name.to_string()))?;
        if !state.is_enabled && !manual {
            return Ok(SyncOutcome::Skipped {
                reason: "stream_disabled",
            });
        }

        let source = self
            .registry
            .source(&stream.source_name)
            .ok_or_else(|| Error::Configuration(format!(
                "stream '{stream_name}' has unregistered source"
            )))?
            .clone();
        let source_row = crate::store::sources::fetch_active(&self.db, &source.name)
            .await?
            .ok_or_else(|| Error::SourceInactive(source.name.clone()))?;

        // Refuse oauth2 sources with no stored credentials before
        // opening an audit row; scheduled runs stay off until re-auth
        if source.auth_type == AuthType::OAuth2 && source_row.oauth_access_token.is_none() {
            streams::disable(&self.db, state.id).await?;
            return Err(Error::AuthMissing(source.name.clone()));
        }

        if !streams::acquire_lease(&self.db, state.id, LEASE).await? {
            return Ok(SyncOutcome::Skipped {
                reason: "already_running",
            });
        }

        let result = self
            .run_leased(&stream, &syncer_key, &source, &state, &source_row.id.to_string())
            .await;
        streams::release_lease(&self.db, state.id).await?;

        // Auth failures disable scheduled runs until re-auth
        if matches!(
            result,
            Err(Error::AuthMissing(_)) | Err(Error::AuthRefreshFailed(_))
        ) {
            streams::disable(&self.db, state.id).await?;
        }
        result
    }

    async fn run_leased(
        &self,
        stream: &crate::registry::StreamDescriptor,
        syncer_key: &str,
        source: &crate::registry::SourceDescriptor,
        state: &StreamStateRow,
        connection_id: &str,
    ) -> Result<SyncOutcome> {
        let audit_id = activities::open(
            &self.db,
            "ingestion",
            &format!("{}_stream_ingestion", source.name),
            &source.name,
            Some(&stream.name),
        )
        .await?;

        let mut window = select_window(stream, state);
        let mut cursor_fallback_used = false;
        let mut attempt = 0u32;

        let attempt_loop = async {
            loop {
                let ctx = SyncContext {
                    stream: stream.clone(),
                    source: source.clone(),
                    state: state.clone(),
                    connection_id: connection_id.to_string(),
                    db: self.db.clone(),
                    storage: self.storage.clone(),
                    tokens: self.tokens.clone(),
                    http: self.http.clone(),
                };
                let Some(factory) = crate::sources::syncer_for(syncer_key) else {
                    break Err(Error::Configuration(format!(
                        "unknown syncer '{syncer_key}'"
                    )));
                };
                let mut syncer = factory(ctx);

                match syncer.run(window.clone()).await {
                    Ok(run) => break Ok(run),
                    Err(Error::CursorInvalidated(detail)) if !cursor_fallback_used => {
                        // Discard the cursor and fall back to a date
                        // range once
                        tracing::warn!(detail = %detail, "Cursor invalidated, falling back to range sync");
                        streams::clear_cursor(&self.db, state.id).await?;
                        let mut cleared = state.clone();
                        cleared.cursor = None;
                        window = select_window(stream, &cleared);
                        cursor_fallback_used = true;
                    }
                    Err(e) if e.is_retryable() => match self.backoff.delay(attempt) {
                        Some(delay) => {
                            tracing::warn!(
                                attempt,
                                delay_secs = delay.as_secs(),
                                error = %e,
                                "Transient sync failure, backing off"
                            );
                            tokio::time::sleep(delay).await;
                            attempt += 1;
                        }
                        None => break Err(e),
                    },
                    Err(e) => break Err(e),
                }
            }
        };

        // The loop cuts out before the task deadline so the audit row can
        // be closed with the cancellation recorded
        let run: SyncerRun =
            match tokio::time::timeout(std::time::Duration::from_secs(14 * 60), attempt_loop).await
            {
                Ok(Ok(run)) => run,
                Ok(Err(e)) => {
                    activities::fail(&self.db, audit_id, &e.to_string()).await?;
                    return Err(e);
                }
                Err(_) => {
                    let e = Error::Cancelled("sync deadline exceeded".to_string());
                    activities::fail(&self.db, audit_id, &e.to_string()).await?;
                    return Err(e);
                }
            };

        let now = Utc::now();
        streams::record_sync_success(&self.db, state.id, run.next_cursor.as_deref(), now).await?;

        // Partial per-scope failures keep the run completed; they are
        // recorded in the audit metadata for inspection
        let scope_errors: Vec<String> = run
            .scope_errors
            .iter()
            .map(|e| format!("{}: {}", e.scope, e.error))
            .collect();
        activities::complete(
            &self.db,
            audit_id,
            run.records_fetched as i64,
            run.batch_keys.first().map(|s| s.as_str()),
            json!({
                "batches": run.batch_keys.len(),
                "scope_errors": scope_errors,
                "cursor_fallback": cursor_fallback_used,
                "next_cursor_present": run.next_cursor.is_some(),
            }),
        )
        .await?;

        tracing::info!(
            records = run.records_fetched,
            batches = run.batch_keys.len(),
            scope_errors = scope_errors.len(),
            "Sync completed"
        );

        Ok(SyncOutcome::Completed {
            records_processed: run.records_fetched,
            next_cursor: run.next_cursor,
            batch_keys: run.batch_keys,
            scope_errors,
        })
    }
}

/// Time-window selection: a stored cursor wins; a first sync gets the
/// configured full range; later syncs get (last success − overlap,
/// now + lookahead).
fn select_window(
    stream: &crate::registry::StreamDescriptor,
    state: &StreamStateRow,
) -> SyncWindow {
    if let Some(cursor) = state.cursor.as_deref() {
        if !cursor.trim().is_empty() {
            return SyncWindow::Cursor(cursor.to_string());
        }
    }

    let now = Utc::now();
    let window = &stream.sync_window;
    match state.last_successful_sync_at {
        None => SyncWindow::Range {
            start: now - Duration::days(window.full_sync_lookback_days),
            end: now + Duration::days(window.full_sync_lookahead_days),
        },
        Some(last) => SyncWindow::Range {
            start: last - Duration::minutes(window.overlap_minutes),
            end: now + Duration::minutes(window.lookahead_minutes),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{StreamDescriptor, StreamOutput, SyncWindowConfig};
    use uuid::Uuid;

    fn stream() -> StreamDescriptor {
        StreamDescriptor {
            name: "google_calendar".into(),
            source_name: "google".into(),
            description: String::new(),
            ingestion_type: IngestionType::Pull,
            output: StreamOutput::Signals,
            cron_schedule: Some("0 */3 * * *".into()),
            syncer: Some("google_calendar".into()),
            processor: "google_calendar".into(),
            signals: vec!["google_calendar_events".into()],
            sync_window: SyncWindowConfig {
                full_sync_lookback_days: 730,
                full_sync_lookahead_days: 365,
                overlap_minutes: 60,
                lookahead_minutes: 0,
            },
            rate_limit_per_sec: None,
        }
    }

    fn state(cursor: Option<&str>, last: Option<chrono::DateTime<Utc>>) -> StreamStateRow {
        StreamStateRow {
            id: Uuid::new_v4(),
            stream_name: "google_calendar".into(),
            source_name: "google".into(),
            is_enabled: true,
            cursor: cursor.map(String::from),
            last_ingestion_at: last,
            last_successful_sync_at: last,
            selected_scopes: None,
            lease_expires_at: None,
        }
    }

    #[test]
    fn test_cursor_takes_precedence() {
        let window = select_window(&stream(), &state(Some("tok-1"), Some(Utc::now())));
        assert_eq!(window.cursor(), Some("tok-1"));
    }

    #[test]
    fn test_first_sync_uses_full_range() {
        let window = select_window(&stream(), &state(None, None));
        let SyncWindow::Range { start, end } = window else {
            panic!("expected range");
        };
        let now = Utc::now();
        assert!((now - start).num_days() >= 729);
        assert!((end - now).num_days() >= 364);
    }

    #[test]
    fn test_incremental_overlaps_last_success() {
        let last = Utc::now() - Duration::hours(3);
        let window = select_window(&stream(), &state(None, Some(last)));
        let SyncWindow::Range { start, .. } = window else {
            panic!("expected range");
        };
        assert_eq!(start, last - Duration::minutes(60));
    }

    #[test]
    fn test_blank_cursor_ignored() {
        let window = select_window(&stream(), &state(Some("  "), None));
        assert!(window.cursor().is_none());
    }
}
