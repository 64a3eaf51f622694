//! Stream processing: raw batches to normalized rows
//!
//! One processor is bound per stream. Processors are pure transforms:
//! they read a raw batch plus the enabled-signal catalog and return
//! normalized records and semantic documents. The runner owns every
//! side effect (signal upserts, semantic versioning, body storage), so
//! the conflict-update contract is enforced in exactly one place.

use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::PgPool;
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::registry::{Registry, SignalDescriptor};
use crate::storage::{RawBatch, Storage};
use crate::store::models::NewSignalRecord;
use crate::store::semantics::{SemanticOutcome, SemanticUpsert};
use crate::store::{signals, semantics};

/// A semantic document produced by a processor: the row to version plus
/// the full body destined for the object store.
#[derive(Debug, Clone)]
pub struct SemanticDoc {
    pub semantic_name: String,
    pub semantic_id: String,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub content_hash: String,
    pub body: Vec<u8>,
    pub updated_at: DateTime<Utc>,
}

/// What one processor run produced.
#[derive(Debug, Default)]
pub struct ProcessorOutput {
    pub records: Vec<NewSignalRecord>,
    pub semantics: Vec<SemanticDoc>,
    /// Malformed entries skipped (never a batch-level failure)
    pub skipped: u64,
}

/// Per-stream transform from raw batch entries to normalized output.
///
/// Contract: a processor only emits records for signals in `enabled`,
/// computes idempotency keys through the signal's dedup strategy, and
/// skips malformed entries individually.
pub trait StreamProcessor: Send + Sync {
    fn process(&self, batch: &RawBatch, enabled: &[&SignalDescriptor]) -> Result<ProcessorOutput>;
}

/// Outcome of running a processor over one stored batch.
#[derive(Debug)]
pub struct ProcessOutcome {
    pub records_processed: i64,
    pub per_signal: HashMap<String, u64>,
    pub skipped: u64,
    pub semantic_versions: u64,
    /// Envelope of the newly written rows, for detection fan-out
    pub envelope: Option<(DateTime<Utc>, DateTime<Utc>)>,
    /// Signals that actually produced rows this run
    pub signals_with_rows: Vec<String>,
}

/// Fetch a raw batch, run its stream's processor, and persist the output.
pub async fn run_processor(
    db: &PgPool,
    storage: &Storage,
    registry: &Registry,
    processor: &dyn StreamProcessor,
    stream_name: &str,
    object_key: &str,
) -> Result<ProcessOutcome> {
    let stream = registry
        .stream(stream_name)
        .ok_or_else(|| Error::StreamNotFound(stream_name.to_string()))?;

    let batch = storage.get_raw_batch(object_key).await?;
    if batch.stream_name != stream.name {
        return Err(Error::Validation(format!(
            "batch at {object_key} declares stream '{}', expected '{}'",
            batch.stream_name, stream.name
        )));
    }

    let enabled = registry.stream_signals(stream_name);
    let output = processor.process(&batch, &enabled)?;

    // Belt and braces on the processor contract: refuse rows for signals
    // outside the enabled set instead of silently writing them.
    for record in &output.records {
        if !enabled.iter().any(|s| s.name == record.signal_name) {
            return Err(Error::Validation(format!(
                "processor for '{stream_name}' emitted disabled signal '{}'",
                record.signal_name
            )));
        }
    }

    let envelope = signals::time_envelope(&output.records);
    let per_signal = signals::upsert_signals(db, &output.records).await?;

    let mut semantic_versions = 0u64;
    for doc in &output.semantics {
        let body_path = format!(
            "semantics/{}/{}/{}.json",
            stream.source_name, doc.semantic_id, doc.content_hash
        );
        let upsert = SemanticUpsert {
            source_name: stream.source_name.clone(),
            semantic_name: doc.semantic_name.clone(),
            semantic_id: doc.semantic_id.clone(),
            title: doc.title.clone(),
            summary: doc.summary.clone(),
            content_hash: doc.content_hash.clone(),
            body_path: body_path.clone(),
            updated_at: doc.updated_at,
        };
        match semantics::upsert_semantic(db, &upsert).await? {
            SemanticOutcome::Unchanged => {}
            outcome => {
                storage.put(&body_path, doc.body.clone()).await?;
                semantic_versions += 1;
                tracing::debug!(
                    semantic_id = %doc.semantic_id,
                    outcome = ?outcome,
                    "Semantic document versioned"
                );
            }
        }
    }

    let mut signals_with_rows: Vec<String> = per_signal
        .iter()
        .filter(|(_, count)| **count > 0)
        .map(|(name, _)| name.clone())
        .collect();
    signals_with_rows.sort();

    let records_processed = output.records.len() as i64 + output.semantics.len() as i64;
    tracing::info!(
        stream = %stream_name,
        records = records_processed,
        skipped = output.skipped,
        semantic_versions,
        "Processed stream batch"
    );

    Ok(ProcessOutcome {
        records_processed,
        per_signal,
        skipped: output.skipped,
        semantic_versions,
        envelope,
        signals_with_rows,
    })
}

/// Summary of an outcome for audit metadata.
pub fn outcome_metadata(outcome: &ProcessOutcome) -> serde_json::Value {
    json!({
        "per_signal": outcome.per_signal,
        "skipped": outcome.skipped,
        "semantic_versions": outcome.semantic_versions,
    })
}
