//! Row models and enum columns
//!
//! Enum columns are stored as text; the `sqlx::Type` derives map them
//! transparently in `query_as` rows.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Kind of a detected transition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum TransitionType {
    Changepoint,
    DataGap,
    EventStart,
    EventEnd,
    CategoricalChange,
}

impl fmt::Display for TransitionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransitionType::Changepoint => "changepoint",
            TransitionType::DataGap => "data_gap",
            TransitionType::EventStart => "event_start",
            TransitionType::EventEnd => "event_end",
            TransitionType::CategoricalChange => "categorical_change",
        };
        write!(f, "{s}")
    }
}

/// Direction of a numeric change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum Direction {
    Increase,
    Decrease,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Increase => write!(f, "increase"),
            Direction::Decrease => write!(f, "decrease"),
        }
    }
}

/// Pipeline-activity status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum ActivityStatus {
    Running,
    Completed,
    Failed,
}

impl fmt::Display for ActivityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActivityStatus::Running => "running",
            ActivityStatus::Completed => "completed",
            ActivityStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Segment classification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum EventType {
    Activity,
    Unknown,
}

/// A connected source row (per provider account or device).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SourceRow {
    pub id: Uuid,
    pub source_name: String,
    pub is_active: bool,
    pub device_token: Option<String>,
    pub oauth_access_token: Option<String>,
    pub oauth_refresh_token: Option<String>,
    pub oauth_expires_at: Option<DateTime<Utc>>,
    pub scopes: Option<String>,
}

/// Mutable per-stream state (cursor, last ingestion, lease).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StreamStateRow {
    pub id: Uuid,
    pub stream_name: String,
    pub source_name: String,
    pub is_enabled: bool,
    pub cursor: Option<String>,
    pub last_ingestion_at: Option<DateTime<Utc>>,
    pub last_successful_sync_at: Option<DateTime<Utc>>,
    /// JSON list of selected sub-scopes (e.g. calendar ids)
    pub selected_scopes: Option<serde_json::Value>,
    pub lease_expires_at: Option<DateTime<Utc>>,
}

/// One observation to insert (pre-dedup).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSignalRecord {
    pub signal_name: String,
    pub source_name: String,
    pub timestamp: DateTime<Utc>,
    pub signal_value: String,
    pub confidence: f64,
    pub idempotency_key: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub source_metadata: serde_json::Value,
}

/// A stored observation row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SignalRecordRow {
    pub id: Uuid,
    pub signal_name: String,
    pub source_name: String,
    pub timestamp: DateTime<Utc>,
    pub signal_value: String,
    pub confidence: f64,
    pub idempotency_key: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub source_metadata: serde_json::Value,
}

/// A versioned semantic document row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SemanticRow {
    pub id: Uuid,
    pub source_name: String,
    pub semantic_name: String,
    pub semantic_id: String,
    pub version: i32,
    pub is_latest: bool,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub content_hash: String,
    /// Object-store key of the full body
    pub body_path: String,
    pub updated_at: DateTime<Utc>,
}

/// One detected transition to upsert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTransition {
    pub source_name: String,
    pub signal_name: String,
    pub transition_time: DateTime<Utc>,
    pub transition_type: TransitionType,
    pub direction: Option<Direction>,
    pub before_mean: Option<f64>,
    pub before_std: Option<f64>,
    pub after_mean: Option<f64>,
    pub after_std: Option<f64>,
    pub magnitude: Option<f64>,
    pub confidence: f64,
    pub detection_method: String,
    pub transition_metadata: serde_json::Value,
}

/// A stored transition row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TransitionRow {
    pub id: Uuid,
    pub source_name: String,
    pub signal_name: String,
    pub transition_time: DateTime<Utc>,
    pub transition_type: TransitionType,
    pub direction: Option<Direction>,
    pub before_mean: Option<f64>,
    pub before_std: Option<f64>,
    pub after_mean: Option<f64>,
    pub after_std: Option<f64>,
    pub magnitude: Option<f64>,
    pub confidence: f64,
    pub detection_method: String,
    pub transition_metadata: serde_json::Value,
}

/// One day segment to persist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEvent {
    pub date: NaiveDate,
    pub cluster_id: i32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub event_type: EventType,
    pub core_density: f64,
    pub transition_ids: Vec<Uuid>,
    pub signal_contributions: serde_json::Value,
    pub event_metadata: serde_json::Value,
}

/// A stored day-segment row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EventRow {
    pub id: Uuid,
    pub date: NaiveDate,
    pub cluster_id: i32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub event_type: EventType,
    pub core_density: f64,
    pub transition_ids: serde_json::Value,
    pub signal_contributions: serde_json::Value,
    pub event_metadata: serde_json::Value,
}

/// An audit row for one unit of pipeline work.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PipelineActivityRow {
    pub id: Uuid,
    pub activity_type: String,
    pub activity_name: String,
    pub source_name: String,
    pub stream_name: Option<String>,
    pub status: ActivityStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub records_processed: i64,
    pub error_message: Option<String>,
    pub output_path: Option<String>,
    pub activity_metadata: serde_json::Value,
}
