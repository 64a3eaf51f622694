//! iOS Core Location stream processor
//!
//! Location fixes arrive as `{timestamp, latitude, longitude, speed,
//! horizontal_accuracy}` entries. Speed becomes the `ios_speed` signal;
//! the fix coordinates ride along on the record.

use serde_json::{json, Value};

use crate::error::Result;
use crate::normalize::{idempotency_key, numeric, parse_timestamp};
use crate::processing::{ProcessorOutput, StreamProcessor};
use crate::registry::SignalDescriptor;
use crate::storage::RawBatch;
use crate::store::models::NewSignalRecord;

const SPEED_SIGNAL: &str = "ios_speed";

/// Fixes with accuracy worse than this are garbage (tunnel, cold start).
const MAX_HORIZONTAL_ACCURACY_M: f64 = 100.0;

pub struct IosLocationProcessor;

pub fn processor_factory() -> Box<dyn crate::processing::StreamProcessor> {
    Box::new(IosLocationProcessor)
}

impl StreamProcessor for IosLocationProcessor {
    fn process(&self, batch: &RawBatch, enabled: &[&SignalDescriptor]) -> Result<ProcessorOutput> {
        let mut output = ProcessorOutput::default();
        let Some(speed_signal) = enabled.iter().find(|s| s.name == SPEED_SIGNAL) else {
            return Ok(output);
        };

        for entry in batch.entries() {
            match transform_fix(speed_signal, entry) {
                Some(record) => output.records.push(record),
                None => output.skipped += 1,
            }
        }
        Ok(output)
    }
}

fn transform_fix(signal: &SignalDescriptor, entry: &Value) -> Option<NewSignalRecord> {
    let timestamp = parse_timestamp(&entry["timestamp"]).ok()?;
    let speed = numeric(&entry["speed"])?;
    // CoreLocation reports -1 for unknown speed
    if speed < 0.0 {
        return None;
    }

    let accuracy = numeric(&entry["horizontal_accuracy"]);
    if matches!(accuracy, Some(a) if a > MAX_HORIZONTAL_ACCURACY_M) {
        return None;
    }

    // Accuracy degrades confidence linearly down to 0.5 at the cutoff
    let confidence = accuracy
        .map(|a| 1.0 - (a / MAX_HORIZONTAL_ACCURACY_M) * 0.5)
        .unwrap_or(0.8)
        * signal.fidelity;

    Some(NewSignalRecord {
        signal_name: signal.name.clone(),
        source_name: signal.source_name.clone(),
        timestamp,
        signal_value: format!("{speed}"),
        confidence: confidence.clamp(0.0, 1.0),
        idempotency_key: idempotency_key(signal.dedup_strategy, &timestamp, entry),
        latitude: numeric(&entry["latitude"]),
        longitude: numeric(&entry["longitude"]),
        source_metadata: json!({
            "horizontal_accuracy": accuracy,
            "altitude": numeric(&entry["altitude"]),
            "course": numeric(&entry["course"]),
        }),
    })
}
