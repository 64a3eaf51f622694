//! Strava activities pull stream
//!
//! Activities are discrete events with explicit start and duration, so
//! they feed the event-boundary detector like calendar entries do. The
//! resume cursor is the epoch second of the newest activity seen; the
//! `after` query parameter makes re-syncs cheap.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::normalize::{idempotency_key, numeric};
use crate::processing::{ProcessorOutput, StreamProcessor};
use crate::registry::SignalDescriptor;
use crate::storage::RawBatch;
use crate::store::models::NewSignalRecord;
use crate::sync::{SyncContext, SyncWindow, Syncer, SyncerRun};

const DEFAULT_BASE_URL: &str = "https://www.strava.com/api/v3";
const SIGNAL_NAME: &str = "strava_activities";
const PER_PAGE: usize = 100;

pub fn processor_factory() -> Box<dyn crate::processing::StreamProcessor> {
    Box::new(StravaActivitiesProcessor)
}

pub fn syncer_factory(ctx: SyncContext) -> Box<dyn Syncer> {
    Box::new(StravaActivitiesSyncer::new(ctx))
}

pub struct StravaActivitiesSyncer {
    ctx: SyncContext,
    base_url: String,
}

impl StravaActivitiesSyncer {
    pub fn new(ctx: SyncContext) -> Self {
        Self {
            base_url: std::env::var("STRAVA_API_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            ctx,
        }
    }

    async fn fetch_page(&self, after_epoch: i64, page: usize, token: &str) -> Result<Vec<Value>> {
        let response = self
            .ctx
            .http
            .get(format!("{}/athlete/activities", self.base_url))
            .bearer_auth(token)
            .query(&[
                ("after", after_epoch.to_string()),
                ("page", page.to_string()),
                ("per_page", PER_PAGE.to_string()),
            ])
            .send()
            .await
            .map_err(|e| Error::UpstreamTransient(format!("strava: {e}")))?;

        let status = response.status();
        match status {
            s if s.is_success() => response
                .json()
                .await
                .map_err(|e| Error::UpstreamSchema(format!("strava response: {e}"))),
            reqwest::StatusCode::UNAUTHORIZED => {
                Err(Error::AuthRefreshFailed("strava rejected token".to_string()))
            }
            reqwest::StatusCode::TOO_MANY_REQUESTS => {
                Err(Error::UpstreamTransient("strava rate limited".to_string()))
            }
            s if s.is_server_error() => {
                Err(Error::UpstreamTransient(format!("strava returned {s}")))
            }
            s => Err(Error::UpstreamSchema(format!("strava returned {s}"))),
        }
    }
}

#[async_trait]
impl Syncer for StravaActivitiesSyncer {
    #[tracing::instrument(skip(self, window), fields(stream = %self.ctx.stream.name))]
    async fn run(&mut self, window: SyncWindow) -> Result<SyncerRun> {
        let provider = self
            .ctx
            .source
            .oauth
            .clone()
            .ok_or_else(|| Error::AuthMissing("strava oauth not configured".to_string()))?;
        let token = self
            .ctx
            .tokens
            .get_valid_token(&self.ctx.source.name, &provider)
            .await?;

        let after_epoch = match &window {
            SyncWindow::Cursor(cursor) => cursor
                .parse::<i64>()
                .map_err(|_| Error::CursorInvalidated(format!("bad strava cursor '{cursor}'")))?,
            SyncWindow::Range { start, .. } => start.timestamp(),
        };

        let mut run = SyncerRun::default();
        let mut newest_epoch = after_epoch;
        let mut page = 1usize;

        loop {
            let activities = self.fetch_page(after_epoch, page, &token).await?;
            if activities.is_empty() {
                break;
            }
            let full_page = activities.len() == PER_PAGE;
            run.records_fetched += activities.len();

            for activity in &activities {
                if let Some(epoch) = activity["start_date"]
                    .as_str()
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|dt| dt.timestamp())
                {
                    newest_epoch = newest_epoch.max(epoch);
                }
            }

            let mut batch =
                RawBatch::with_events(&self.ctx.stream.name, &self.ctx.source.name, activities);
            batch.sync_metadata = Some(json!({"page": page, "synced_at": Utc::now()}));
            let key = self
                .ctx
                .storage
                .put_raw_batch(&batch, &self.ctx.connection_id, Utc::now())
                .await?;
            run.batch_keys.push(key);

            if !full_page {
                break;
            }
            page += 1;
        }

        if newest_epoch > 0 {
            run.next_cursor = Some(newest_epoch.to_string());
        }
        Ok(run)
    }
}

pub struct StravaActivitiesProcessor;

impl StreamProcessor for StravaActivitiesProcessor {
    fn process(&self, batch: &RawBatch, enabled: &[&SignalDescriptor]) -> Result<ProcessorOutput> {
        let mut output = ProcessorOutput::default();
        let Some(signal) = enabled.iter().find(|s| s.name == SIGNAL_NAME) else {
            return Ok(output);
        };

        for activity in batch.entries() {
            match transform_activity(signal, activity) {
                Some(record) => output.records.push(record),
                None => output.skipped += 1,
            }
        }
        Ok(output)
    }
}

fn transform_activity(signal: &SignalDescriptor, activity: &Value) -> Option<NewSignalRecord> {
    let id = match &activity["id"] {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        _ => return None,
    };
    let start = activity["start_date"]
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))?;
    let elapsed_seconds = numeric(&activity["elapsed_time"])?;
    let end = start + Duration::seconds(elapsed_seconds as i64);

    let sport = activity["sport_type"]
        .as_str()
        .or_else(|| activity["type"].as_str())
        .unwrap_or("Workout");
    let name = activity["name"].as_str().unwrap_or(sport);

    Some(NewSignalRecord {
        signal_name: signal.name.clone(),
        source_name: signal.source_name.clone(),
        timestamp: start,
        signal_value: name.to_string(),
        confidence: (0.95 * signal.fidelity).clamp(0.0, 1.0),
        idempotency_key: idempotency_key(signal.dedup_strategy, &start, &json!({"id": id})),
        latitude: activity["start_latlng"][0].as_f64(),
        longitude: activity["start_latlng"][1].as_f64(),
        source_metadata: json!({
            "timing": {
                "start": start.to_rfc3339(),
                "end": end.to_rfc3339(),
                "duration_minutes": elapsed_seconds / 60.0,
            },
            "event": {
                "status": "confirmed",
                "sport_type": sport,
            },
            "activity_id": id,
            "distance_meters": numeric(&activity["distance"]),
            "moving_time_seconds": numeric(&activity["moving_time"]),
        }),
    })
}
