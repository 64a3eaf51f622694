//! iOS HealthKit stream processor
//!
//! One push stream carries mixed sample types; each entry declares its
//! `type`. Heart-rate samples feed the continuous `ios_heart_rate`
//! signal, sleep-stage samples the categorical `ios_sleep` signal.

use serde_json::{json, Value};

use crate::error::Result;
use crate::normalize::{idempotency_key, numeric, parse_timestamp};
use crate::processing::{ProcessorOutput, StreamProcessor};
use crate::registry::SignalDescriptor;
use crate::storage::RawBatch;
use crate::store::models::NewSignalRecord;

const HEART_RATE_SIGNAL: &str = "ios_heart_rate";
const SLEEP_SIGNAL: &str = "ios_sleep";

/// Stages HealthKit reports for sleep analysis samples.
const SLEEP_STAGES: &[&str] = &[
    "in_bed",
    "awake",
    "asleep_core",
    "asleep_deep",
    "asleep_rem",
    "asleep_unspecified",
];

pub struct IosHealthkitProcessor;

pub fn processor_factory() -> Box<dyn crate::processing::StreamProcessor> {
    Box::new(IosHealthkitProcessor)
}

impl StreamProcessor for IosHealthkitProcessor {
    fn process(&self, batch: &RawBatch, enabled: &[&SignalDescriptor]) -> Result<ProcessorOutput> {
        let mut output = ProcessorOutput::default();
        let heart_rate = enabled.iter().find(|s| s.name == HEART_RATE_SIGNAL);
        let sleep = enabled.iter().find(|s| s.name == SLEEP_SIGNAL);

        for entry in batch.entries() {
            let record = match entry["type"].as_str() {
                Some("heart_rate") => heart_rate.and_then(|s| transform_heart_rate(s, entry)),
                Some("sleep") => sleep.and_then(|s| transform_sleep(s, entry)),
                _ => None,
            };
            match record {
                Some(record) => output.records.push(record),
                None => output.skipped += 1,
            }
        }
        Ok(output)
    }
}

fn transform_heart_rate(signal: &SignalDescriptor, entry: &Value) -> Option<NewSignalRecord> {
    let timestamp = parse_timestamp(&entry["timestamp"]).ok()?;
    let bpm = numeric(&entry["value"])?;
    if !(20.0..=260.0).contains(&bpm) {
        return None;
    }

    Some(NewSignalRecord {
        signal_name: signal.name.clone(),
        source_name: signal.source_name.clone(),
        timestamp,
        signal_value: format!("{bpm}"),
        confidence: (0.95 * signal.fidelity).clamp(0.0, 1.0),
        idempotency_key: idempotency_key(signal.dedup_strategy, &timestamp, entry),
        latitude: None,
        longitude: None,
        source_metadata: json!({
            "motion_context": entry["motion_context"].as_str(),
            "source_device": entry["source_device"].as_str(),
        }),
    })
}

fn transform_sleep(signal: &SignalDescriptor, entry: &Value) -> Option<NewSignalRecord> {
    let timestamp = parse_timestamp(&entry["timestamp"]).ok()?;
    let stage = entry["value"].as_str()?.trim().to_ascii_lowercase();
    if !SLEEP_STAGES.contains(&stage.as_str()) {
        return None;
    }

    Some(NewSignalRecord {
        signal_name: signal.name.clone(),
        source_name: signal.source_name.clone(),
        timestamp,
        signal_value: stage,
        confidence: (0.9 * signal.fidelity).clamp(0.0, 1.0),
        idempotency_key: idempotency_key(signal.dedup_strategy, &timestamp, entry),
        latitude: None,
        longitude: None,
        source_metadata: json!({
            "source_device": entry["source_device"].as_str(),
            "duration_seconds": numeric(&entry["duration_seconds"]),
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{
        CategoricalConfig, ChangePointConfig, DedupStrategy, DetectorBinding, ValueType,
    };

    fn heart_rate_signal() -> SignalDescriptor {
        SignalDescriptor {
            name: HEART_RATE_SIGNAL.into(),
            stream_name: "ios_healthkit".into(),
            source_name: "ios".into(),
            description: String::new(),
            value_type: ValueType::Continuous,
            unit: "bpm".into(),
            dedup_strategy: DedupStrategy::Single,
            detector: DetectorBinding::ChangePoint(ChangePointConfig::default()),
            weight: 1.0,
            fidelity: 1.0,
        }
    }

    fn sleep_signal() -> SignalDescriptor {
        SignalDescriptor {
            name: SLEEP_SIGNAL.into(),
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

    #[test]
    fn test_mixed_batch_routes_by_type() {
        let hr = heart_rate_signal();
        let sleep = sleep_signal();
        let batch = RawBatch::with_data(
            "ios_healthkit",
            "ios",
            vec![
                json!({"type": "heart_rate", "timestamp": "2025-05-03T09:00:00Z", "value": 62}),
                json!({"type": "sleep", "timestamp": "2025-05-03T01:00:00Z", "value": "asleep_core"}),
                json!({"type": "steps", "timestamp": "2025-05-03T09:00:00Z", "value": 12}),
            ],
        );
        let output = IosHealthkitProcessor.process(&batch, &[&hr, &sleep]).unwrap();

        assert_eq!(output.records.len(), 2);
        assert_eq!(output.skipped, 1);
        assert_eq!(output.records[0].signal_name, HEART_RATE_SIGNAL);
        assert_eq!(output.records[1].signal_value, "asleep_core");
    }

    #[test]
    fn test_physiologically_impossible_bpm_skipped() {
        let hr = heart_rate_signal();
        let batch = RawBatch::with_data(
            "ios_healthkit",
            "ios",
            vec![json!({"type": "heart_rate", "timestamp": "2025-05-03T09:00:00Z", "value": 900})],
        );
        let output = IosHealthkitProcessor.process(&batch, &[&hr]).unwrap();
        assert!(output.records.is_empty());
        assert_eq!(output.skipped, 1);
    }

    #[test]
    fn test_unknown_sleep_stage_skipped() {
        let sleep = sleep_signal();
        let batch = RawBatch::with_data(
            "ios_healthkit",
            "ios",
            vec![json!({"type": "sleep", "timestamp": "2025-05-03T01:00:00Z", "value": "dozing"})],
        );
        let output = IosHealthkitProcessor.process(&batch, &[&sleep]).unwrap();
        assert_eq!(output.skipped, 1);
    }

    #[test]
    fn test_disabled_signal_entries_counted_skipped() {
        let hr = heart_rate_signal();
        let batch = RawBatch::with_data(
            "ios_healthkit",
            "ios",
            vec![json!({"type": "sleep", "timestamp": "2025-05-03T01:00:00Z", "value": "awake"})],
        );
        // Sleep not enabled: its entries are skipped, not written
        let output = IosHealthkitProcessor.process(&batch, &[&hr]).unwrap();
        assert!(output.records.is_empty());
        assert_eq!(output.skipped, 1);
    }
}
