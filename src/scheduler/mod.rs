//! Scheduler: cron producers and the work queue
//!
//! A small set of singleton cron jobs produce tasks; the worker pool
//! drains them. `should_sync` is the pure selection rule the scheduled
//! sync producer applies to every pull stream.

pub mod handlers;
pub mod queue;
pub mod tasks;
pub mod worker;

use chrono::{DateTime, Duration, Utc};
use cron::Schedule;
use std::str::FromStr;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::client::Meridian;
use crate::error::{Error, Result};
use tasks::Task;

/// A stream is due when the next cron fire after its last ingestion is
/// already in the past. A stream that never synced is always due.
pub fn should_sync(
    cron_expr: &str,
    last_ingestion_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<bool> {
    let schedule = parse_cron(cron_expr)?;
    let Some(last) = last_ingestion_at else {
        return Ok(true);
    };
    Ok(schedule
        .after(&last)
        .next()
        .map(|next_fire| next_fire <= now)
        .unwrap_or(false))
}

/// Parse a standard 5-field cron expression (UTC). The `cron` crate
/// wants a seconds field, so a 5-field expression gets `0` prepended.
fn parse_cron(expr: &str) -> Result<Schedule> {
    let expr = expr.trim();
    let fields = expr.split_whitespace().count();
    let normalized = if fields == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    };
    Schedule::from_str(&normalized)
        .map_err(|e| Error::Configuration(format!("invalid cron '{expr}': {e}")))
}

/// Singleton cron producers.
pub struct Scheduler {
    app: Arc<Meridian>,
    scheduler: JobScheduler,
}

impl Scheduler {
    pub async fn new(app: Arc<Meridian>) -> Result<Self> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| Error::Other(format!("Failed to create scheduler: {e}")))?;
        Ok(Self { app, scheduler })
    }

    /// Register the cron producers and start ticking.
    pub async fn start(&self) -> Result<()> {
        let tz = self.app.config.default_tz;
        let audit_retention = self.app.config.audit_retention_days;

        // Every minute: fan out due scheduled syncs
        self.add_job("0 * * * * *", Task::CheckScheduledSyncs).await?;
        // Hourly: proactive token refresh
        self.add_job("0 17 * * * *", Task::RefreshExpiringTokens).await?;
        // Daily: prune audit rows and aged raw objects
        self.add_job(
            "0 11 4 * * *",
            Task::CleanupAuditRows {
                days: audit_retention,
            },
        )
        .await?;

        // 03:00 local: whole-day detection for yesterday, then the
        // segmenter half an hour behind it
        self.add_local_job("0 0 3 * * *", tz, DailyTask::DetectAll).await?;
        self.add_local_job("0 30 3 * * *", tz, DailyTask::Segment).await?;

        self.scheduler
            .start()
            .await
            .map_err(|e| Error::Other(format!("Failed to start scheduler: {e}")))?;

        tracing::info!("Scheduler started");
        Ok(())
    }

    async fn add_job(&self, schedule: &str, task: Task) -> Result<()> {
        let app = self.app.clone();
        let job = Job::new_async(schedule, move |_id, _lock| {
            let app = app.clone();
            let task = task.clone();
            Box::pin(async move {
                if let Err(e) = app.queue.enqueue(&task).await {
                    tracing::error!(task = task.name(), error = %e, "Failed to enqueue cron task");
                }
            })
        })
        .map_err(|e| Error::Other(format!("Failed to create job: {e}")))?;

        self.scheduler
            .add(job)
            .await
            .map_err(|e| Error::Other(format!("Failed to add job: {e}")))?;
        Ok(())
    }

    async fn add_local_job(
        &self,
        schedule: &str,
        tz: chrono_tz::Tz,
        kind: DailyTask,
    ) -> Result<()> {
        let app = self.app.clone();
        let job = Job::new_async_tz(schedule, tz, move |_id, _lock| {
            let app = app.clone();
            Box::pin(async move {
                // Cron fires in the small hours; the day being finalized
                // is the previous local day
                let date = (Utc::now().with_timezone(&tz) - Duration::days(1)).date_naive();
                let task = match kind {
                    DailyTask::DetectAll => Task::DetectAllSignals {
                        date,
                        tz: tz.name().to_string(),
                    },
                    DailyTask::Segment => Task::SegmentDay {
                        date,
                        tz: tz.name().to_string(),
                    },
                };
                if let Err(e) = app.queue.enqueue(&task).await {
                    tracing::error!(task = task.name(), error = %e, "Failed to enqueue cron task");
                }
            })
        })
        .map_err(|e| Error::Other(format!("Failed to create job: {e}")))?;

        self.scheduler
            .add(job)
            .await
            .map_err(|e| Error::Other(format!("Failed to add job: {e}")))?;
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        self.scheduler
            .shutdown()
            .await
            .map_err(|e| Error::Other(format!("Failed to stop scheduler: {e}")))?;
        tracing::info!("Scheduler stopped");
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum DailyTask {
    DetectAll,
    Segment,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn test_should_sync_due() {
        // Cron every 3 hours; last ran at 12:00, next fire 15:00 <= 15:01
        let due = should_sync(
            "0 */3 * * *",
            Some(ts("2025-05-03T12:00:00Z")),
            ts("2025-05-03T15:01:00Z"),
        )
        .unwrap();
        assert!(due);
    }

    #[test]
    fn test_should_sync_not_due() {
        let due = should_sync(
            "0 */3 * * *",
            Some(ts("2025-05-03T12:00:00Z")),
            ts("2025-05-03T14:59:00Z"),
        )
        .unwrap();
        assert!(!due);
    }

    #[test]
    fn test_never_synced_is_due() {
        assert!(should_sync("0 */3 * * *", None, Utc::now()).unwrap());
    }

    #[test]
    fn test_six_field_cron_accepted() {
        assert!(should_sync(
            "0 0 */3 * * *",
            Some(ts("2025-05-03T12:00:00Z")),
            ts("2025-05-03T15:01:00Z"),
        )
        .unwrap());
    }

    #[test]
    fn test_invalid_cron_rejected() {
        assert!(should_sync("not a cron", None, Utc::now()).is_err());
    }
}
