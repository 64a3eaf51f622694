//! Google Calendar stream processor

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{json, Value};

use crate::error::Result;
use crate::normalize::idempotency_key;
use crate::processing::{ProcessorOutput, StreamProcessor};
use crate::registry::SignalDescriptor;
use crate::storage::RawBatch;
use crate::store::models::NewSignalRecord;

const SIGNAL_NAME: &str = "google_calendar_events";

pub struct GoogleCalendarProcessor;

impl StreamProcessor for GoogleCalendarProcessor {
    fn process(&self, batch: &RawBatch, enabled: &[&SignalDescriptor]) -> Result<ProcessorOutput> {
        let mut output = ProcessorOutput::default();
        let Some(signal) = enabled.iter().find(|s| s.name == SIGNAL_NAME) else {
            return Ok(output);
        };

        for event in batch.entries() {
            match transform_event(signal, event) {
                Some(record) => output.records.push(record),
                None => output.skipped += 1,
            }
        }
        Ok(output)
    }
}

fn transform_event(signal: &SignalDescriptor, event: &Value) -> Option<NewSignalRecord> {
    let event_id = event["id"].as_str()?;
    let start_time = parse_event_time(&event["start"])?;
    let end_time = parse_event_time(&event["end"]);

    let status = event["status"].as_str().unwrap_or("confirmed");
    if status == "cancelled" {
        return None;
    }

    let summary = event["summary"].as_str().unwrap_or("(untitled)");
    let is_all_day = event["start"]["date"].is_string();
    let duration_minutes = end_time.map(|end| (end - start_time).num_minutes());

    let metadata = json!({
        "timing": {
            "start": start_time.to_rfc3339(),
            "end": end_time.map(|t| t.to_rfc3339()),
            "duration_minutes": duration_minutes,
        },
        "event": {
            "status": status,
            "is_all_day": is_all_day,
            "location": event["location"].as_str(),
            "organizer_email": event["organizer"]["email"].as_str(),
            "attendee_count": event["attendees"].as_array().map(Vec::len).unwrap_or(0),
            "recurring_event_id": event["recurringEventId"].as_str(),
        },
        "event_id": event_id,
    });

    Some(NewSignalRecord {
        signal_name: signal.name.clone(),
        source_name: signal.source_name.clone(),
        timestamp: start_time,
        signal_value: summary.to_string(),
        confidence: signal.fidelity.min(1.0),
        idempotency_key: idempotency_key(
            signal.dedup_strategy,
            &start_time,
            &json!({"event_id": event_id}),
        ),
        latitude: None,
        longitude: None,
        source_metadata: metadata,
    })
}

/// Google event times are either `{"dateTime": rfc3339}` or, for all-day
/// events, `{"date": "YYYY-MM-DD"}`.
fn parse_event_time(time: &Value) -> Option<DateTime<Utc>> {
    if let Some(s) = time["dateTime"].as_str() {
        return DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc));
    }
    if let Some(s) = time["date"].as_str() {
        return NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc());
    }
    None
}
