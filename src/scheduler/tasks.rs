//! Task taxonomy and wire envelope
//!
//! Tasks travel as JSON envelopes on the queue:
//! `{id, task, args, kwargs, retries, eta, expires}`. The typed [`Task`]
//! enum is what handlers dispatch on; the envelope is the transport.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Everything the workers know how to execute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task", content = "kwargs", rename_all = "snake_case")]
pub enum Task {
    SyncStream {
        stream_name: String,
        manual: bool,
    },
    ProcessStreamBatch {
        stream_name: String,
        object_key: String,
    },
    DetectOneSignal {
        signal_name: String,
        date: NaiveDate,
        tmin: DateTime<Utc>,
        tmax: DateTime<Utc>,
        tz: String,
    },
    DetectAllSignals {
        date: NaiveDate,
        tz: String,
    },
    SegmentDay {
        date: NaiveDate,
        tz: String,
    },
    RefreshExpiringTokens,
    CleanupAuditRows {
        days: i64,
    },
    CheckScheduledSyncs,
}

impl Task {
    /// Stable task name, used for logging and queue metrics.
    pub fn name(&self) -> &'static str {
        match self {
            Task::SyncStream { .. } => "sync_stream",
            Task::ProcessStreamBatch { .. } => "process_stream_batch",
            Task::DetectOneSignal { .. } => "detect_one_signal",
            Task::DetectAllSignals { .. } => "detect_all_signals",
            Task::SegmentDay { .. } => "segment_day",
            Task::RefreshExpiringTokens => "refresh_expiring_tokens",
            Task::CleanupAuditRows { .. } => "cleanup_audit_rows",
            Task::CheckScheduledSyncs => "check_scheduled_syncs",
        }
    }

    /// Per-kind execution deadline.
    pub fn deadline(&self) -> Duration {
        match self {
            Task::SyncStream { .. } => Duration::from_secs(15 * 60),
            Task::ProcessStreamBatch { .. } => Duration::from_secs(10 * 60),
            Task::DetectOneSignal { .. } | Task::DetectAllSignals { .. } => {
                Duration::from_secs(5 * 60)
            }
            Task::SegmentDay { .. } => Duration::from_secs(10 * 60),
            // Housekeeping gets the processing budget
            _ => Duration::from_secs(10 * 60),
        }
    }

    /// Maximum queue-level retries for this kind.
    pub fn max_retries(&self) -> u32 {
        match self {
            // The sync runtime retries upstream failures itself
            Task::SyncStream { .. } => 1,
            Task::ProcessStreamBatch { .. } => 3,
            Task::DetectOneSignal { .. } | Task::DetectAllSignals { .. } => 2,
            Task::SegmentDay { .. } => 2,
            _ => 1,
        }
    }
}

/// Wire envelope for one queued task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub id: Uuid,
    pub task: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Value,
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub eta: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expires: Option<DateTime<Utc>>,
}

impl TaskEnvelope {
    pub fn new(task: &Task) -> Result<Self> {
        let encoded = serde_json::to_value(task)?;
        Ok(Self {
            id: Uuid::new_v4(),
            task: task.name().to_string(),
            args: Vec::new(),
            kwargs: encoded
                .get("kwargs")
                .cloned()
                .unwrap_or_else(|| json!({})),
            retries: 0,
            eta: None,
            expires: None,
        })
    }

    /// Decode the typed task back out of the envelope.
    pub fn decode(&self) -> Result<Task> {
        let mut value = json!({ "task": self.task });
        // Unit tasks carry no kwargs; handing serde an empty map would
        // trip the adjacently-tagged representation
        let empty = self.kwargs.as_object().map(|m| m.is_empty()).unwrap_or(true);
        if !empty {
            value["kwargs"] = self.kwargs.clone();
        }
        serde_json::from_value(value)
            .map_err(|e| Error::Queue(format!("undecodable task '{}': {e}", self.task)))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires, Some(at) if at <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_roundtrip() {
        let task = Task::DetectOneSignal {
            signal_name: "ios_speed".into(),
            date: NaiveDate::from_ymd_opt(2025, 5, 3).unwrap(),
            tmin: "2025-05-03T00:00:00Z".parse().unwrap(),
            tmax: "2025-05-03T23:59:59Z".parse().unwrap(),
            tz: "America/Chicago".into(),
        };
        let envelope = TaskEnvelope::new(&task).unwrap();
        assert_eq!(envelope.task, "detect_one_signal");
        assert_eq!(envelope.decode().unwrap(), task);
    }

    #[test]
    fn test_unit_task_roundtrip() {
        let envelope = TaskEnvelope::new(&Task::CheckScheduledSyncs).unwrap();
        assert_eq!(envelope.decode().unwrap(), Task::CheckScheduledSyncs);
    }

    #[test]
    fn test_expiry() {
        let mut envelope = TaskEnvelope::new(&Task::RefreshExpiringTokens).unwrap();
        assert!(!envelope.is_expired(Utc::now()));
        envelope.expires = Some(Utc::now() - chrono::Duration::seconds(1));
        assert!(envelope.is_expired(Utc::now()));
    }

    #[test]
    fn test_deadlines_follow_task_kind() {
        let sync = Task::SyncStream {
            stream_name: "google_calendar".into(),
            manual: false,
        };
        assert_eq!(sync.deadline(), Duration::from_secs(900));
        assert_eq!(Task::CheckScheduledSyncs.deadline(), Duration::from_secs(600));
    }
}
