//! Raw-batch envelope and key layout
//!
//! Every raw object is JSON with a stable envelope; payload fields beyond
//! the envelope are source-specific and pass through untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Envelope of one raw batch.
///
/// Exactly one of `data`, `events`, or `chunks` is populated depending on
/// the stream shape; processors read whichever their stream declares.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawBatch {
    pub stream_name: String,
    pub source_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunks: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_metadata: Option<Value>,
}

impl RawBatch {
    pub fn with_data(stream_name: &str, source_name: &str, data: Vec<Value>) -> Self {
        Self {
            stream_name: stream_name.to_string(),
            source_name: source_name.to_string(),
            data: Some(data),
            events: None,
            chunks: None,
            batch_metadata: None,
            sync_metadata: None,
        }
    }

    pub fn with_events(stream_name: &str, source_name: &str, events: Vec<Value>) -> Self {
        Self {
            stream_name: stream_name.to_string(),
            source_name: source_name.to_string(),
            data: None,
            events: Some(events),
            chunks: None,
            batch_metadata: None,
            sync_metadata: None,
        }
    }

    /// The entries of this batch regardless of which envelope field holds
    /// them.
    pub fn entries(&self) -> &[Value] {
        self.data
            .as_deref()
            .or(self.events.as_deref())
            .or(self.chunks.as_deref())
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

/// Canonical key layout:
/// `<source_name>/<YYYY>/<MM>/<DD>/<connection_id>/<uuid>.json`
pub fn batch_key(source_name: &str, at: DateTime<Utc>, connection_id: &str) -> String {
    format!(
        "{}/{}/{}/{}.json",
        source_name,
        at.format("%Y/%m/%d"),
        connection_id,
        Uuid::new_v4()
    )
}
