//! Task handlers: one function per task kind
//!
//! Handlers own the side effects around the pure cores (detectors,
//! segmenter): audit rows, store reads/writes, and follow-up fan-out.

use chrono::{Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use std::collections::HashMap;

use super::should_sync;
use super::tasks::Task;
use crate::client::Meridian;
use crate::detectors::run_detector;
use crate::error::{Error, Result};
use crate::processing::{outcome_metadata, run_processor};
use crate::registry::AuthType;
use crate::segmenter::{local_day_window, segment_day};
use crate::store::{activities, events, signals, streams, transitions};
use crate::sync::SyncOutcome;

/// Handlers cut their own work short of the worker's hard timeout so
/// open audit rows can be closed as `cancelled` instead of dangling.
const DEADLINE_MARGIN: std::time::Duration = std::time::Duration::from_secs(30);

async fn with_deadline<T>(
    deadline: std::time::Duration,
    work: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    let budget = deadline.saturating_sub(DEADLINE_MARGIN).max(DEADLINE_MARGIN);
    match tokio::time::timeout(budget, work).await {
        Ok(result) => result,
        Err(_) => Err(Error::Cancelled("deadline exceeded".to_string())),
    }
}

/// Dispatch one task to its handler.
pub async fn handle(app: &Meridian, task: Task) -> Result<()> {
    match task {
        Task::SyncStream {
            stream_name,
            manual,
        } => handle_sync_stream(app, &stream_name, manual).await,
        Task::ProcessStreamBatch {
            stream_name,
            object_key,
        } => handle_process_batch(app, &stream_name, &object_key).await,
        Task::DetectOneSignal {
            signal_name,
            date,
            tmin,
            tmax,
            tz,
        } => handle_detect_one(app, &signal_name, date, tmin, tmax, &tz).await,
        Task::DetectAllSignals { date, tz } => handle_detect_all(app, date, &tz).await,
        Task::SegmentDay { date, tz } => handle_segment_day(app, date, &tz).await,
        Task::RefreshExpiringTokens => handle_refresh_tokens(app).await,
        Task::CleanupAuditRows { days } => handle_cleanup(app, days).await,
        Task::CheckScheduledSyncs => handle_check_syncs(app).await,
    }
}

async fn handle_sync_stream(app: &Meridian, stream_name: &str, manual: bool) -> Result<()> {
    match app.sync.sync_stream(stream_name, manual).await? {
        SyncOutcome::Completed { batch_keys, .. } => {
            for object_key in batch_keys {
                app.queue
                    .enqueue(&Task::ProcessStreamBatch {
                        stream_name: stream_name.to_string(),
                        object_key,
                    })
                    .await?;
            }
            Ok(())
        }
        SyncOutcome::Skipped { reason } => {
            tracing::debug!(stream = %stream_name, reason, "Sync skipped");
            Ok(())
        }
    }
}

async fn handle_process_batch(app: &Meridian, stream_name: &str, object_key: &str) -> Result<()> {
    let stream = app
        .registry
        .stream(stream_name)
        .ok_or_else(|| Error::StreamNotFound(stream_name.to_string()))?;

    let audit_id = activities::open(
        app.db.pool(),
        "signal_creation",
        &format!("{stream_name}_signal_creation"),
        &stream.source_name,
        Some(stream_name),
    )
    .await?;

    let processor = match crate::sources::processor_for(&stream.processor) {
        Some(factory) => factory(),
        None => {
            let err = Error::Configuration(format!("unknown processor '{}'", stream.processor));
            activities::fail(app.db.pool(), audit_id, &err.to_string()).await?;
            return Err(err);
        }
    };

    let work = run_processor(
        app.db.pool(),
        &app.storage,
        &app.registry,
        processor.as_ref(),
        stream_name,
        object_key,
    );
    let outcome = match with_deadline(std::time::Duration::from_secs(10 * 60), work).await {
        Ok(outcome) => outcome,
        Err(e) => {
            activities::fail(app.db.pool(), audit_id, &e.to_string()).await?;
            return Err(e);
        }
    };

    activities::complete(
        app.db.pool(),
        audit_id,
        outcome.records_processed,
        Some(object_key),
        outcome_metadata(&outcome),
    )
    .await?;

    // Fan out detection over the window the new rows actually span
    if let Some((tmin, tmax)) = outcome.envelope {
        let tz = app.config.default_tz;
        let date = tmin.with_timezone(&tz).date_naive();
        for signal_name in outcome.signals_with_rows {
            app.queue
                .enqueue(&Task::DetectOneSignal {
                    signal_name,
                    date,
                    tmin,
                    tmax,
                    tz: tz.name().to_string(),
                })
                .await?;
        }
    }
    Ok(())
}

async fn handle_detect_one(
    app: &Meridian,
    signal_name: &str,
    date: NaiveDate,
    tmin: chrono::DateTime<Utc>,
    tmax: chrono::DateTime<Utc>,
    _tz: &str,
) -> Result<()> {
    let signal = app
        .registry
        .signal(signal_name)
        .ok_or_else(|| Error::SignalNotFound(signal_name.to_string()))?;
    if signal.detector.is_none() {
        return Ok(());
    }

    let audit_id = activities::open(
        app.db.pool(),
        "transition_detection",
        &format!("{signal_name}_transition_detection"),
        &signal.source_name,
        Some(&signal.stream_name),
    )
    .await?;

    let work = async {
        let rows = signals::fetch_window(app.db.pool(), signal_name, tmin, tmax).await?;
        let detected = run_detector(signal, &rows, tmin, tmax)
            .map_err(|e| Error::Detector(format!("{signal_name}: {e}")))?;
        transitions::replace_window(app.db.pool(), signal_name, tmin, tmax, &detected).await
    };
    let result = with_deadline(std::time::Duration::from_secs(5 * 60), work).await;

    match result {
        Ok(stored) => {
            activities::complete(
                app.db.pool(),
                audit_id,
                stored as i64,
                None,
                serde_json::json!({"date": date, "tmin": tmin, "tmax": tmax}),
            )
            .await?;
            Ok(())
        }
        Err(e) => {
            activities::fail(app.db.pool(), audit_id, &e.to_string()).await?;
            Err(e)
        }
    }
}

async fn handle_detect_all(app: &Meridian, date: NaiveDate, tz: &str) -> Result<()> {
    let tz: Tz = tz
        .parse()
        .map_err(|_| Error::Validation(format!("unknown timezone '{tz}'")))?;
    let (tmin, tmax) = local_day_window(date, tz);

    // One failing detector never aborts whole-day detection
    let mut failures = 0usize;
    for signal in app.registry.signals() {
        if signal.detector.is_none() {
            continue;
        }
        if let Err(e) = handle_detect_one(app, &signal.name, date, tmin, tmax, tz.name()).await {
            tracing::warn!(signal = %signal.name, error = %e, "Detector failed, continuing");
            failures += 1;
        }
    }

    tracing::info!(date = %date, failures, "Whole-day detection complete");
    Ok(())
}

async fn handle_segment_day(app: &Meridian, date: NaiveDate, tz: &str) -> Result<()> {
    let tz: Tz = tz
        .parse()
        .map_err(|_| Error::Validation(format!("unknown timezone '{tz}'")))?;

    let audit_id = activities::open(
        app.db.pool(),
        "day_segmentation",
        "segment_day",
        "meridian",
        None,
    )
    .await?;

    let work = async {
        let (utc_start, utc_end) = local_day_window(date, tz);
        let rows = transitions::fetch_window(app.db.pool(), utc_start, utc_end).await?;

        let weights: HashMap<String, f64> = app
            .registry
            .signals()
            .map(|s| (s.name.clone(), s.weight))
            .collect();
        let segments = segment_day(&rows, date, tz, &weights, &app.config.segmenter);
        events::replace_day(app.db.pool(), date, &segments).await?;
        Ok(segments.len())
    };
    let result = with_deadline(std::time::Duration::from_secs(10 * 60), work).await;

    match result {
        Ok(count) => {
            activities::complete(
                app.db.pool(),
                audit_id,
                count as i64,
                None,
                serde_json::json!({"date": date, "timezone": tz.name()}),
            )
            .await?;
            Ok(())
        }
        Err(e) => {
            activities::fail(app.db.pool(), audit_id, &e.to_string()).await?;
            Err(e)
        }
    }
}

async fn handle_refresh_tokens(app: &Meridian) -> Result<()> {
    let expiring = crate::store::sources::fetch_expiring(app.db.pool(), Duration::hours(1)).await?;
    for row in expiring {
        let Some(descriptor) = app.registry.source(&row.source_name) else {
            continue;
        };
        if descriptor.auth_type != AuthType::OAuth2 {
            continue;
        }
        let Some(provider) = descriptor.oauth.as_ref() else {
            continue;
        };
        match app.tokens.refresh(&row.source_name, provider).await {
            Ok(_) => tracing::info!(source = %row.source_name, "Proactively refreshed token"),
            Err(e) => {
                tracing::warn!(source = %row.source_name, error = %e, "Proactive refresh failed")
            }
        }
    }
    Ok(())
}

async fn handle_cleanup(app: &Meridian, days: i64) -> Result<()> {
    let removed = activities::cleanup(app.db.pool(), days).await?;

    let cutoff = Utc::now() - Duration::days(app.config.raw_retention_days);
    let mut objects_removed = 0u64;
    for source in app.registry.sources() {
        objects_removed += app
            .storage
            .delete_older_than(&format!("{}/", source.name), cutoff)
            .await?;
    }

    tracing::info!(
        audit_rows = removed,
        raw_objects = objects_removed,
        "Cleanup complete"
    );
    Ok(())
}

async fn handle_check_syncs(app: &Meridian) -> Result<()> {
    let now = Utc::now();
    let states = streams::fetch_enabled(app.db.pool()).await?;
    let states_by_name: HashMap<&str, _> = states
        .iter()
        .map(|s| (s.stream_name.as_str(), s))
        .collect();

    for stream in app.registry.scheduled_streams() {
        let Some(source) = app.registry.source(&stream.source_name) else {
            continue;
        };
        if source.platform != crate::registry::Platform::Cloud {
            continue;
        }
        let Some(state) = states_by_name.get(stream.name.as_str()) else {
            continue;
        };
        let Some(cron_expr) = stream.cron_schedule.as_deref() else {
            continue;
        };

        match should_sync(cron_expr, state.last_ingestion_at, now) {
            Ok(true) => {
                tracing::info!(stream = %stream.name, "Scheduled sync due");
                app.queue
                    .enqueue(&Task::SyncStream {
                        stream_name: stream.name.clone(),
                        manual: false,
                    })
                    .await?;
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(stream = %stream.name, error = %e, "Bad cron expression")
            }
        }
    }
    Ok(())
}
