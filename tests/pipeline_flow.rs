//! Processor-to-detector flow over the shipped registry, no database:
//! raw batches go through the real processors, their records through the
//! real detectors, and the resulting transitions through the segmenter.

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use uuid::Uuid;

use meridian::detectors::run_detector;
use meridian::processing::StreamProcessor;
use meridian::registry::{load_registry, Registry};
use meridian::segmenter::{local_day_window, segment_day, SegmenterConfig};
use meridian::sources::google::calendar::GoogleCalendarProcessor;
use meridian::sources::ios::location::IosLocationProcessor;
use meridian::storage::RawBatch;
use meridian::store::models::{
    Direction, EventType, NewSignalRecord, SignalRecordRow, TransitionRow, TransitionType,
};

fn registry() -> Registry {
    let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("sources");
    load_registry(&root).expect("shipped registry must load")
}

fn ts(s: &str) -> DateTime<Utc> {
    s.parse().unwrap()
}

/// Simulate the store round trip a processed record takes before a
/// detector reads it back.
fn as_row(record: &NewSignalRecord) -> SignalRecordRow {
    SignalRecordRow {
        id: Uuid::new_v4(),
        signal_name: record.signal_name.clone(),
        source_name: record.source_name.clone(),
        timestamp: record.timestamp,
        signal_value: record.signal_value.clone(),
        confidence: record.confidence,
        idempotency_key: record.idempotency_key.clone(),
        latitude: record.latitude,
        longitude: record.longitude,
        source_metadata: record.source_metadata.clone(),
    }
}

#[test]
fn calendar_event_to_boundary_transitions() {
    let registry = registry();
    let signal = registry.signal("google_calendar_events").unwrap();

    let batch = RawBatch::with_events(
        "google_calendar",
        "google",
        vec![json!({
            "id": "e1",
            "status": "confirmed",
            "summary": "Design review",
            "start": {"dateTime": "2025-05-03T14:00:00Z"},
            "end": {"dateTime": "2025-05-03T15:00:00Z"},
        })],
    );
    let enabled = registry.stream_signals("google_calendar");
    let output = GoogleCalendarProcessor.process(&batch, &enabled).unwrap();

    assert_eq!(output.records.len(), 1);
    assert_eq!(
        output.records[0].idempotency_key,
        "2025-05-03T14:00:00+00:00:e1"
    );

    let rows: Vec<SignalRecordRow> = output.records.iter().map(as_row).collect();
    let transitions = run_detector(
        signal,
        &rows,
        ts("2025-05-03T00:00:00Z"),
        ts("2025-05-04T00:00:00Z"),
    )
    .unwrap();

    assert_eq!(transitions.len(), 2);
    assert_eq!(transitions[0].transition_time, ts("2025-05-03T14:00:00Z"));
    assert_eq!(transitions[0].direction, Some(Direction::Increase));
    assert!(transitions[0].confidence >= 0.95);
    assert_eq!(transitions[1].transition_time, ts("2025-05-03T15:00:00Z"));
    assert_eq!(transitions[1].direction, Some(Direction::Decrease));
    assert!(transitions[1].confidence >= 0.95);
}

#[test]
fn speed_step_to_changepoint() {
    let registry = registry();
    let signal = registry.signal("ios_speed").unwrap();

    // 600 fixes over an hour: walking then cycling
    let start = ts("2025-05-03T10:00:00Z");
    let mut state = 42u64;
    let mut noise = |amplitude: f64| {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((state >> 11) as f64 / (1u64 << 53) as f64 * 2.0 - 1.0) * amplitude
    };
    let fixes: Vec<_> = (0..600)
        .map(|i| {
            let speed = if i < 300 {
                1.4 + noise(0.2)
            } else {
                13.0 + noise(0.5)
            };
            json!({
                "timestamp": (start + Duration::seconds(6 * i)).to_rfc3339(),
                "latitude": 41.88,
                "longitude": -87.63,
                "speed": speed,
                "horizontal_accuracy": 5.0,
            })
        })
        .collect();

    let batch = RawBatch::with_data("ios_location", "ios", fixes);
    let enabled = registry.stream_signals("ios_location");
    let output = IosLocationProcessor.process(&batch, &enabled).unwrap();
    assert_eq!(output.records.len(), 600);

    let rows: Vec<SignalRecordRow> = output.records.iter().map(as_row).collect();
    let transitions = run_detector(signal, &rows, start, start + Duration::hours(1)).unwrap();

    let expected = start + Duration::seconds(1800);
    let step = transitions
        .iter()
        .filter(|t| t.transition_type == TransitionType::Changepoint)
        .find(|t| (t.transition_time - expected).num_seconds().abs() <= 10)
        .expect("changepoint within 10s of the step");

    assert_eq!(step.direction, Some(Direction::Increase));
    assert!((step.before_mean.unwrap() - 1.4).abs() < 0.3);
    assert!((step.after_mean.unwrap() - 13.0).abs() < 0.5);
}

#[test]
fn idempotent_processing_regenerates_identical_keys() {
    let registry = registry();
    let batch = RawBatch::with_events(
        "google_calendar",
        "google",
        vec![json!({
            "id": "e9",
            "status": "confirmed",
            "summary": "Standup",
            "start": {"dateTime": "2025-05-03T09:00:00Z"},
            "end": {"dateTime": "2025-05-03T09:15:00Z"},
        })],
    );
    let enabled = registry.stream_signals("google_calendar");

    let first = GoogleCalendarProcessor.process(&batch, &enabled).unwrap();
    let second = GoogleCalendarProcessor.process(&batch, &enabled).unwrap();

    assert_eq!(first.records.len(), second.records.len());
    assert_eq!(
        first.records[0].idempotency_key,
        second.records[0].idempotency_key
    );
    assert_eq!(first.records[0].signal_value, second.records[0].signal_value);
}

#[test]
fn day_of_transitions_segments_within_band() {
    let registry = registry();
    let weights: HashMap<String, f64> = registry
        .signals()
        .map(|s| (s.name.clone(), s.weight))
        .collect();

    let date = chrono::NaiveDate::from_ymd_opt(2025, 5, 3).unwrap();
    let tz = chrono_tz::UTC;
    let (day_start, day_end) = local_day_window(date, tz);

    // Three dense clusters plus scatter, as a realistic detected day
    let mut rows: Vec<TransitionRow> = Vec::new();
    let mut add = |time: DateTime<Utc>, signal: &str, source: &str, confidence: f64| {
        rows.push(TransitionRow {
            id: Uuid::new_v4(),
            source_name: source.to_string(),
            signal_name: signal.to_string(),
            transition_time: time,
            transition_type: TransitionType::Changepoint,
            direction: Some(Direction::Increase),
            before_mean: None,
            before_std: None,
            after_mean: None,
            after_std: None,
            magnitude: Some(1.0),
            confidence,
            detection_method: "pelt_changepoint".to_string(),
            transition_metadata: json!({}),
        });
    };

    for hour in [8i64, 13, 19] {
        for i in 0..4 {
            add(
                day_start + Duration::hours(hour) + Duration::seconds(25 * i),
                "ios_speed",
                "ios",
                0.9,
            );
        }
    }
    for i in 0..18i64 {
        let signal = if i % 2 == 0 {
            ("ios_heart_rate", "ios")
        } else {
            ("google_calendar_events", "google")
        };
        add(
            day_start + Duration::minutes(25 + 77 * i),
            signal.0,
            signal.1,
            0.7,
        );
    }

    let events = segment_day(&rows, date, tz, &weights, &SegmenterConfig::default());
    assert!(!events.is_empty());

    let activity_count = events
        .iter()
        .filter(|e| e.event_type == EventType::Activity)
        .count();
    assert!(
        (8..=24).contains(&activity_count),
        "activity segments: {activity_count}"
    );

    for pair in events.windows(2) {
        assert!(pair[0].end_time <= pair[1].start_time, "segments overlap");
        let gap = (pair[1].start_time - pair[0].end_time).num_seconds();
        assert!(gap <= 60, "interior gap of {gap}s left unfilled");
    }
    for event in &events {
        assert!(event.start_time < event.end_time);
        assert!(event.start_time >= day_start);
        assert!(event.end_time <= day_end);
    }
}
