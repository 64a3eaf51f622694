//! Event-boundary detection for discrete events
//!
//! Calendar entries and workout activities carry explicit start/end
//! times, so no statistics are needed: each event yields a presence
//! step-up at its start and a step-down at its end.

use chrono::{DateTime, Duration, Utc};
use serde_json::json;

use crate::error::Result;
use crate::normalize::timestamp::parse_timestamp_str;
use crate::registry::{EventBoundaryConfig, SignalDescriptor};
use crate::store::models::{Direction, NewTransition, SignalRecordRow, TransitionType};

/// Confidence for confirmed events with explicit boundaries.
const CONFIRMED_CONFIDENCE: f64 = 0.98;
/// Dampened confidence for tentative events.
const TENTATIVE_CONFIDENCE: f64 = 0.7;
/// Dampened confidence for needs-action invitations.
const NEEDS_ACTION_CONFIDENCE: f64 = 0.6;

pub(crate) fn detect(
    signal: &SignalDescriptor,
    _config: &EventBoundaryConfig,
    sorted: &[&SignalRecordRow],
) -> Result<Vec<NewTransition>> {
    let mut transitions = Vec::new();

    for record in sorted {
        let timing = &record.source_metadata["timing"];

        let event_start = timing["start"]
            .as_str()
            .and_then(|s| parse_timestamp_str(s).ok())
            .unwrap_or(record.timestamp);

        let event_end = timing["end"]
            .as_str()
            .and_then(|s| parse_timestamp_str(s).ok())
            .or_else(|| {
                timing["duration_minutes"]
                    .as_i64()
                    .map(|mins| event_start + Duration::minutes(mins))
            })
            .unwrap_or_else(|| event_start + Duration::hours(1));

        let status = record.source_metadata["event"]["status"]
            .as_str()
            .unwrap_or("confirmed");
        let confidence = match status {
            "tentative" => TENTATIVE_CONFIDENCE,
            "needsAction" | "needs_action" => NEEDS_ACTION_CONFIDENCE,
            _ => CONFIRMED_CONFIDENCE,
        };

        transitions.push(boundary(signal, record, event_start, Direction::Increase, confidence));
        transitions.push(boundary(signal, record, event_end, Direction::Decrease, confidence));
    }

    Ok(transitions)
}

fn boundary(
    signal: &SignalDescriptor,
    record: &SignalRecordRow,
    at: DateTime<Utc>,
    direction: Direction,
    confidence: f64,
) -> NewTransition {
    let (before, after, edge) = match direction {
        Direction::Increase => (0.0, 1.0, "start"),
        Direction::Decrease => (1.0, 0.0, "end"),
    };

    NewTransition {
        source_name: signal.source_name.clone(),
        signal_name: signal.name.clone(),
        transition_time: at,
        transition_type: TransitionType::Changepoint,
        direction: Some(direction),
        before_mean: Some(before),
        before_std: Some(0.0),
        after_mean: Some(after),
        after_std: Some(0.0),
        magnitude: Some(1.0),
        confidence,
        detection_method: "event_boundary".to_string(),
        transition_metadata: json!({
            "event_title": record.signal_value,
            "event_edge": edge,
            "idempotency_key": record.idempotency_key,
        }),
    }
}
