//! Categorical-change detection for labeled states
//!
//! Sleep stages and app-focus states arrive as label samples. A
//! transition is a change of label where the previous label persisted
//! long enough to have been a real state, not sampling jitter. Session
//! breaks inject data gaps and reset the walk.

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::error::Result;
use crate::registry::{CategoricalConfig, SignalDescriptor};
use crate::store::models::{NewTransition, SignalRecordRow, TransitionType};

pub(crate) fn detect(
    signal: &SignalDescriptor,
    config: &CategoricalConfig,
    sorted: &[&SignalRecordRow],
) -> Result<Vec<NewTransition>> {
    let mut transitions = Vec::new();

    let mut previous_value: Option<String> = None;
    let mut previous_timestamp: Option<DateTime<Utc>> = None;
    let mut value_started_at: Option<DateTime<Utc>> = None;

    for record in sorted {
        let current_value = record.signal_value.trim().to_ascii_lowercase();
        let current_timestamp = record.timestamp;

        if current_value.is_empty() {
            continue;
        }

        // Session break: inject a gap and restart value tracking
        if let Some(prev_ts) = previous_timestamp {
            let gap_minutes = (current_timestamp - prev_ts).num_seconds() as f64 / 60.0;
            if gap_minutes > config.gap_threshold_minutes as f64 {
                if let Some(prev_value) = &previous_value {
                    transitions.push(NewTransition {
                        source_name: signal.source_name.clone(),
                        signal_name: signal.name.clone(),
                        transition_time: prev_ts,
                        transition_type: TransitionType::DataGap,
                        direction: None,
                        before_mean: None,
                        before_std: None,
                        after_mean: None,
                        after_std: None,
                        magnitude: None,
                        confidence: 1.0,
                        detection_method: "gap_detection".to_string(),
                        transition_metadata: json!({
                            "gap_minutes": gap_minutes,
                            "last_value": prev_value,
                        }),
                    });
                }
                previous_value = None;
                value_started_at = None;
            }
        }

        match &previous_value {
            Some(prev) if *prev != current_value => {
                let held_minutes = value_started_at
                    .map(|started| (current_timestamp - started).num_seconds() as f64 / 60.0)
                    .unwrap_or(0.0);

                if held_minutes >= config.min_value_duration_minutes as f64 {
                    transitions.push(NewTransition {
                        source_name: signal.source_name.clone(),
                        signal_name: signal.name.clone(),
                        transition_time: current_timestamp,
                        transition_type: TransitionType::CategoricalChange,
                        direction: None,
                        before_mean: None,
                        before_std: None,
                        after_mean: None,
                        after_std: None,
                        magnitude: None,
                        confidence: change_confidence(record.confidence, held_minutes),
                        detection_method: "categorical_change".to_string(),
                        transition_metadata: json!({
                            "previous_value": prev,
                            "current_value": current_value,
                            "previous_value_duration_minutes": held_minutes,
                        }),
                    });
                }
                value_started_at = Some(current_timestamp);
            }
            None => {
                value_started_at = Some(current_timestamp);
            }
            Some(_) => {}
        }

        previous_value = Some(current_value);
        previous_timestamp = Some(current_timestamp);
    }

    Ok(transitions)
}

/// Base record confidence plus a small boost for values that held long
/// enough to be unambiguous.
fn change_confidence(base_confidence: f64, held_minutes: f64) -> f64 {
    let boost = if held_minutes >= 30.0 {
        0.05
    } else if held_minutes >= 15.0 {
        0.03
    } else {
        0.0
    };
    (base_confidence + boost).min(0.99)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::run_detector;
    use crate::detectors::testutil::record;
    use crate::registry::{DedupStrategy, DetectorBinding, ValueType};
    use chrono::Duration;

    fn sleep_signal() -> SignalDescriptor {
        SignalDescriptor {
            name: "ios_sleep".into(),
            stream_name: "ios_healthkit".into(),
            source_name: "ios".into(),
            description: String::new(),
            value_type: ValueType::Categorical,
            unit: "stage".into(),
            dedup_strategy: DedupStrategy::Single,
            detector: DetectorBinding::CategoricalChange(CategoricalConfig::default()),
            weight: 1.5,
            fidelity: 1.0,
        }
    }

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    /// One sample per minute holding `value` for `minutes`.
    fn stage(
        records: &mut Vec<SignalRecordRow>,
        start: DateTime<Utc>,
        value: &str,
        minutes: i64,
    ) -> DateTime<Utc> {
        for i in 0..minutes {
            records.push(record(
                "ios_sleep",
                "ios",
                start + Duration::minutes(i),
                value,
                0.9,
                json!({}),
            ));
        }
        start + Duration::minutes(minutes)
    }

    #[test]
    fn test_sleep_stage_walk() {
        // asleep_core 40m -> asleep_rem 25m -> awake 5m -> asleep_core 30m
        let mut records = Vec::new();
        let t0 = ts("2025-05-03T01:00:00Z");
        let t1 = stage(&mut records, t0, "asleep_core", 40);
        let t2 = stage(&mut records, t1, "asleep_rem", 25);
        let t3 = stage(&mut records, t2, "awake", 5);
        stage(&mut records, t3, "asleep_core", 30);

        let transitions = run_detector(
            &sleep_signal(),
            &records,
            t0,
            ts("2025-05-03T08:00:00Z"),
        )
        .unwrap();

        let changes: Vec<_> = transitions
            .iter()
            .filter(|t| t.transition_type == TransitionType::CategoricalChange)
            .collect();
        assert_eq!(changes.len(), 3);
        assert_eq!(changes[0].transition_time, t1);
        assert_eq!(changes[0].transition_metadata["previous_value"], "asleep_core");
        assert_eq!(changes[0].transition_metadata["current_value"], "asleep_rem");
        assert_eq!(changes[1].transition_time, t2);
        assert_eq!(changes[2].transition_time, t3);
    }

    #[test]
    fn test_short_lived_value_suppressed() {
        // 2-minute blip below the 5-minute floor produces no transition
        let mut records = Vec::new();
        let t0 = ts("2025-05-03T01:00:00Z");
        let t1 = stage(&mut records, t0, "asleep_core", 40);
        let t2 = stage(&mut records, t1, "awake", 2);
        stage(&mut records, t2, "asleep_core", 30);

        let transitions = run_detector(
            &sleep_signal(),
            &records,
            t0,
            ts("2025-05-03T08:00:00Z"),
        )
        .unwrap();

        let changes: Vec<_> = transitions
            .iter()
            .filter(|t| t.transition_type == TransitionType::CategoricalChange)
            .collect();
        // core->awake fires (core held 40m); awake->core is suppressed
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].transition_metadata["current_value"], "awake");
    }

    #[test]
    fn test_session_gap_injects_data_gap() {
        let mut records = Vec::new();
        let t0 = ts("2025-05-03T01:00:00Z");
        let t1 = stage(&mut records, t0, "asleep_core", 40);
        // 90-minute silence ends the session
        let resumed = t1 + Duration::minutes(90);
        stage(&mut records, resumed, "awake", 20);

        let transitions = run_detector(
            &sleep_signal(),
            &records,
            t0,
            ts("2025-05-03T08:00:00Z"),
        )
        .unwrap();

        let gaps: Vec<_> = transitions
            .iter()
            .filter(|t| t.transition_type == TransitionType::DataGap)
            .collect();
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].transition_time, t1 - Duration::minutes(1));

        // No categorical change across the gap: tracking was reset
        assert!(transitions
            .iter()
            .all(|t| t.transition_type != TransitionType::CategoricalChange));
    }

    #[test]
    fn test_duration_boost() {
        assert!((change_confidence(0.9, 40.0) - 0.95).abs() < 1e-9);
        assert!((change_confidence(0.9, 16.0) - 0.93).abs() < 1e-9);
        assert!((change_confidence(0.9, 5.0) - 0.9).abs() < 1e-9);
        assert!((change_confidence(0.97, 40.0) - 0.99).abs() < 1e-9);
    }
}
