//! iOS microphone stream processor
//!
//! The mic stream pushes chunked payloads: each chunk summarizes a
//! recording window with an average audio level. Transcription is an
//! external concern; only the level feeds a signal here.

use serde_json::{json, Value};

use crate::error::Result;
use crate::normalize::{idempotency_key, numeric, parse_timestamp};
use crate::processing::{ProcessorOutput, StreamProcessor};
use crate::registry::SignalDescriptor;
use crate::storage::RawBatch;
use crate::store::models::NewSignalRecord;

const AUDIO_LEVEL_SIGNAL: &str = "ios_audio_level";

pub struct IosMicProcessor;

pub fn processor_factory() -> Box<dyn crate::processing::StreamProcessor> {
    Box::new(IosMicProcessor)
}

impl StreamProcessor for IosMicProcessor {
    fn process(&self, batch: &RawBatch, enabled: &[&SignalDescriptor]) -> Result<ProcessorOutput> {
        let mut output = ProcessorOutput::default();
        let Some(signal) = enabled.iter().find(|s| s.name == AUDIO_LEVEL_SIGNAL) else {
            return Ok(output);
        };

        for chunk in batch.entries() {
            match transform_chunk(signal, chunk) {
                Some(record) => output.records.push(record),
                None => output.skipped += 1,
            }
        }
        Ok(output)
    }
}

fn transform_chunk(signal: &SignalDescriptor, chunk: &Value) -> Option<NewSignalRecord> {
    let timestamp = parse_timestamp(&chunk["timestamp"]).ok()?;
    let level_db = numeric(&chunk["audio_level_db"])?;
    // dBFS: silence floor to clipping
    if !(-120.0..=0.0).contains(&level_db) {
        return None;
    }

    Some(NewSignalRecord {
        signal_name: signal.name.clone(),
        source_name: signal.source_name.clone(),
        timestamp,
        signal_value: format!("{level_db}"),
        confidence: (0.85 * signal.fidelity).clamp(0.0, 1.0),
        idempotency_key: idempotency_key(signal.dedup_strategy, &timestamp, chunk),
        latitude: None,
        longitude: None,
        source_metadata: json!({
            "duration_seconds": numeric(&chunk["duration_seconds"]),
            "chunk_id": chunk["chunk_id"].as_str(),
        }),
    })
}
