//! Google Calendar syncer

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::sources::google::client::GoogleClient;
use crate::storage::RawBatch;
use crate::sync::{ScopeError, SyncContext, SyncWindow, Syncer, SyncerRun};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventsResponse {
    #[serde(default)]
    items: Vec<Value>,
    next_page_token: Option<String>,
    next_sync_token: Option<String>,
}

pub struct GoogleCalendarSyncer {
    ctx: SyncContext,
    client: GoogleClient,
}

impl GoogleCalendarSyncer {
    pub fn new(ctx: SyncContext) -> Self {
        let provider = ctx
            .source
            .oauth
            .clone()
            .expect("google source is oauth2-configured");
        let client = GoogleClient::new(
            ctx.http.clone(),
            ctx.tokens.clone(),
            provider,
            &ctx.source.name,
        );
        Self { ctx, client }
    }

    /// Selected calendar ids from stream state; primary when none chosen.
    fn calendar_ids(&self) -> Vec<String> {
        self.ctx
            .state
            .selected_scopes
            .as_ref()
            .and_then(|v| v.as_array())
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| id.as_str().map(String::from))
                    .collect::<Vec<_>>()
            })
            .filter(|ids| !ids.is_empty())
            .unwrap_or_else(|| vec!["primary".to_string()])
    }

    async fn fetch_incremental(
        &self,
        calendar_id: &str,
        sync_token: &str,
    ) -> Result<EventsResponse> {
        let path = format!("calendars/{calendar_id}/events");
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;
        let mut final_sync_token = None;

        loop {
            let mut params: Vec<(&str, &str)> = vec![("syncToken", sync_token)];
            if let Some(token) = page_token.as_deref() {
                params.push(("pageToken", token));
            }
            let response: EventsResponse = self.client.get_with_params(&path, &params).await?;
            items.extend(response.items);
            if response.next_sync_token.is_some() {
                final_sync_token = response.next_sync_token;
            }
            page_token = response.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        Ok(EventsResponse {
            items,
            next_page_token: None,
            next_sync_token: final_sync_token,
        })
    }

    async fn fetch_range(
        &self,
        calendar_id: &str,
        start: chrono::DateTime<Utc>,
        end: chrono::DateTime<Utc>,
    ) -> Result<EventsResponse> {
        let path = format!("calendars/{calendar_id}/events");
        let time_min = start.to_rfc3339();
        let time_max = end.to_rfc3339();

        let mut items = Vec::new();
        let mut page_token: Option<String> = None;
        let mut final_sync_token = None;

        loop {
            let mut params: Vec<(&str, &str)> = vec![
                ("maxResults", "2500"),
                ("singleEvents", "true"),
                ("showDeleted", "false"),
                ("timeMin", &time_min),
                ("timeMax", &time_max),
            ];
            if let Some(token) = page_token.as_deref() {
                params.push(("pageToken", token));
            }
            let response: EventsResponse = self.client.get_with_params(&path, &params).await?;
            items.extend(response.items);
            if response.next_sync_token.is_some() {
                final_sync_token = response.next_sync_token;
            }
            page_token = response.next_page_token;
            if page_token.is_none() {
                break;
            }
            tracing::debug!(calendar_id, events = items.len(), "Fetched calendar page");
        }

        Ok(EventsResponse {
            items,
            next_page_token: None,
            next_sync_token: final_sync_token,
        })
    }
}

#[async_trait]
impl Syncer for GoogleCalendarSyncer {
    #[tracing::instrument(skip(self, window), fields(stream = %self.ctx.stream.name))]
    async fn run(&mut self, window: SyncWindow) -> Result<SyncerRun> {
        let mut run = SyncerRun::default();
        let mut sync_tokens = parse_cursor(window.cursor());
        let calendars = self.calendar_ids();

        // The cursor (when present) beats any date range; calendars
        // without a stored token inside a cursor sync fall back to the
        // stream's configured full range.
        let (range_start, range_end) = match &window {
            SyncWindow::Range { start, end } => (*start, *end),
            SyncWindow::Cursor(_) => {
                let w = &self.ctx.stream.sync_window;
                let now = Utc::now();
                (
                    now - chrono::Duration::days(w.full_sync_lookback_days),
                    now + chrono::Duration::days(w.full_sync_lookahead_days),
                )
            }
        };

        for calendar_id in &calendars {
            let existing_token = sync_tokens.get(calendar_id).cloned();

            let response = match existing_token {
                Some(token) => match self.fetch_incremental(calendar_id, &token).await {
                    Err(Error::CursorInvalidated(_)) => {
                        tracing::warn!(calendar_id, "Sync token expired, range resync");
                        sync_tokens.remove(calendar_id);
                        run.scope_errors.push(ScopeError {
                            scope: calendar_id.clone(),
                            error: "sync token expired (410), range resync".to_string(),
                        });
                        self.fetch_range(calendar_id, range_start, range_end).await
                    }
                    other => other,
                },
                None => self.fetch_range(calendar_id, range_start, range_end).await,
            };

            // One failing calendar never aborts the others
            let response = match response {
                Ok(response) => response,
                Err(e) if matches!(e, Error::Validation(_)) => {
                    tracing::warn!(calendar_id, error = %e, "Calendar scope failed, continuing");
                    run.scope_errors.push(ScopeError {
                        scope: calendar_id.clone(),
                        error: e.to_string(),
                    });
                    continue;
                }
                Err(e) => return Err(e),
            };

            if let Some(token) = response.next_sync_token {
                sync_tokens.insert(calendar_id.clone(), token);
            }

            if response.items.is_empty() {
                continue;
            }
            run.records_fetched += response.items.len();

            let mut batch = RawBatch::with_events(
                &self.ctx.stream.name,
                &self.ctx.source.name,
                response.items,
            );
            batch.sync_metadata = Some(json!({
                "calendar_id": calendar_id,
                "synced_at": Utc::now(),
                "sync_type": if sync_tokens.contains_key(calendar_id) { "incremental" } else { "range" },
            }));
            let key = self
                .ctx
                .storage
                .put_raw_batch(&batch, &self.ctx.connection_id, Utc::now())
                .await?;
            run.batch_keys.push(key);
        }

        run.next_cursor = if sync_tokens.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&sync_tokens)?)
        };
        Ok(run)
    }
}

/// The stream cursor is a JSON map `{calendar_id: sync_token}`. A legacy
/// bare token is treated as the primary calendar's.
fn parse_cursor(cursor: Option<&str>) -> HashMap<String, String> {
    let Some(cursor) = cursor else {
        return HashMap::new();
    };
    match serde_json::from_str::<HashMap<String, String>>(cursor) {
        Ok(map) => map,
        Err(_) if !cursor.trim().is_empty() => {
            let mut map = HashMap::new();
            map.insert("primary".to_string(), cursor.trim().to_string());
            map
        }
        Err(_) => HashMap::new(),
    }
}
