//! Object-store module for raw batch storage
//!
//! Raw batches are append-only JSON objects in an S3-compatible bucket;
//! the key layout is owned here and nowhere else.

pub mod batch;
pub mod memory;
pub mod s3;

pub use batch::{batch_key, RawBatch};
pub use memory::MemoryStorage;
pub use s3::{S3Config, S3Storage};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::error::Result;

/// Metadata for one stored object.
#[derive(Debug, Clone)]
pub struct ObjectMeta {
    pub key: String,
    pub size_bytes: i64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Storage trait for object-store backends
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Vec<u8>>;
    async fn delete(&self, key: &str) -> Result<()>;
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>>;
}

/// Main storage interface
#[derive(Clone)]
pub struct Storage {
    backend: Arc<dyn StorageBackend>,
}

impl Storage {
    /// Create S3/MinIO storage from environment configuration
    pub async fn s3_from_env() -> Result<Self> {
        let config = S3Config::from_env()?;
        Ok(Self {
            backend: Arc::new(S3Storage::new(config).await?),
        })
    }

    /// Wrap an arbitrary backend (tests use an in-memory one)
    pub fn with_backend(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    pub async fn put(&self, key: &str, data: Vec<u8>) -> Result<()> {
        self.backend.put(key, data).await
    }

    pub async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.backend.get(key).await
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        self.backend.delete(key).await
    }

    pub async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        self.backend.list(prefix).await
    }

    /// Store one raw batch under the canonical key layout; returns the key.
    pub async fn put_raw_batch(
        &self,
        batch: &RawBatch,
        connection_id: &str,
        at: DateTime<Utc>,
    ) -> Result<String> {
        let key = batch_key(&batch.source_name, at, connection_id);
        let body = serde_json::to_vec(batch)?;
        self.put(&key, body).await?;
        Ok(key)
    }

    /// Fetch and decode one raw batch.
    pub async fn get_raw_batch(&self, key: &str) -> Result<RawBatch> {
        let body = self.get(key).await?;
        let batch = serde_json::from_slice(&body)?;
        Ok(batch)
    }

    /// Delete raw objects older than the retention window under a prefix.
    /// Returns the number removed.
    pub async fn delete_older_than(
        &self,
        prefix: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<u64> {
        let mut removed = 0u64;
        for meta in self.list(prefix).await? {
            if matches!(meta.last_modified, Some(ts) if ts < cutoff) {
                self.delete(&meta.key).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}
