//! Push ingestion adapter
//!
//! Trusted devices post batches; the adapter authenticates the device
//! token, lands the payload in the object store untouched, and reports
//! the key so the caller can enqueue processing. No parsing happens
//! here beyond the envelope fields.

use chrono::Utc;
use serde_json::Value;
use sqlx::PgPool;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::registry::{IngestionType, Registry};
use crate::scheduler::queue::TaskQueue;
use crate::scheduler::tasks::Task;
use crate::storage::{RawBatch, Storage};
use crate::store::streams;

/// Result of accepting one pushed batch.
#[derive(Debug)]
pub struct PushOutcome {
    pub object_key: String,
    pub stream_name: String,
    pub entry_count: usize,
}

pub struct PushAdapter {
    db: PgPool,
    storage: Storage,
    registry: Arc<Registry>,
    queue: TaskQueue,
}

impl PushAdapter {
    pub fn new(db: PgPool, storage: Storage, registry: Arc<Registry>, queue: TaskQueue) -> Self {
        Self {
            db,
            storage,
            registry,
            queue,
        }
    }

    /// Append one raw batch pushed by a device.
    #[tracing::instrument(skip(self, device_token, payload), fields(stream = %stream_name))]
    pub async fn append_raw_batch(
        &self,
        stream_name: &str,
        device_token: &str,
        payload: Value,
    ) -> Result<PushOutcome> {
        let stream = self
            .registry
            .stream(stream_name)
            .ok_or_else(|| Error::StreamNotFound(stream_name.to_string()))?;
        if stream.ingestion_type != IngestionType::Push {
            return Err(Error::Validation(format!(
                "stream '{stream_name}' does not accept pushes"
            )));
        }

        let source_row = crate::store::sources::fetch_by_device_token(&self.db, device_token)
            .await?
            .ok_or_else(|| Error::AuthMissing("unrecognized device token".to_string()))?;
        if source_row.source_name != stream.source_name {
            return Err(Error::AuthMissing(format!(
                "device belongs to '{}', stream to '{}'",
                source_row.source_name, stream.source_name
            )));
        }

        // Envelope only: declared stream, device id, and one payload field
        let declared = payload["stream_name"].as_str().unwrap_or(stream_name);
        if declared != stream_name {
            return Err(Error::Validation(format!(
                "payload declares stream '{declared}', posted to '{stream_name}'"
            )));
        }
        let device_id = payload["device_id"]
            .as_str()
            .ok_or_else(|| Error::Validation("payload missing device_id".to_string()))?
            .to_string();

        let entries = |field: &str| -> Option<Vec<Value>> {
            payload[field].as_array().cloned()
        };
        let data = entries("data");
        let chunks = entries("chunks");
        if data.is_none() && chunks.is_none() {
            return Err(Error::Validation(
                "payload carries neither data nor chunks".to_string(),
            ));
        }

        let entry_count = data
            .as_ref()
            .map(Vec::len)
            .or(chunks.as_ref().map(Vec::len))
            .unwrap_or(0);

        let batch = RawBatch {
            stream_name: stream_name.to_string(),
            source_name: stream.source_name.clone(),
            data,
            events: None,
            chunks,
            batch_metadata: Some(serde_json::json!({
                "device_id": device_id,
                "received_at": Utc::now(),
            })),
            sync_metadata: None,
        };

        let object_key = self
            .storage
            .put_raw_batch(&batch, &device_id, Utc::now())
            .await?;

        if let Some(state) = streams::fetch_by_name(&self.db, stream_name).await? {
            streams::record_ingestion(&self.db, state.id, Utc::now()).await?;
        }

        self.queue
            .enqueue(&Task::ProcessStreamBatch {
                stream_name: stream_name.to_string(),
                object_key: object_key.clone(),
            })
            .await?;

        tracing::info!(key = %object_key, entries = entry_count, "Accepted pushed batch");

        Ok(PushOutcome {
            object_key,
            stream_name: stream_name.to_string(),
            entry_count,
        })
    }
}
