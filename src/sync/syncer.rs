//! Syncer seam: one implementation per pull stream

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;

use crate::error::Result;
use crate::oauth::TokenManager;
use crate::registry::{SourceDescriptor, StreamDescriptor};
use crate::storage::Storage;
use crate::store::models::StreamStateRow;

/// What a syncer is asked to cover. An opaque upstream cursor always
/// beats a date range when the stream carries one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SyncWindow {
    /// Resume from an upstream-defined token
    Cursor(String),
    /// Cover an explicit time range
    Range {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

impl SyncWindow {
    pub fn cursor(&self) -> Option<&str> {
        match self {
            SyncWindow::Cursor(token) => Some(token),
            SyncWindow::Range { .. } => None,
        }
    }
}

/// A failure scoped to one sub-resource (e.g. one calendar of many).
/// Scope errors do not fail the sync; they land in audit metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeError {
    pub scope: String,
    pub error: String,
}

/// What one syncer run produced.
#[derive(Debug, Default)]
pub struct SyncerRun {
    /// Object-store keys of the raw batches written
    pub batch_keys: Vec<String>,
    pub records_fetched: usize,
    /// Fresh resume cursor, when the upstream handed one back
    pub next_cursor: Option<String>,
    pub scope_errors: Vec<ScopeError>,
}

/// Everything a syncer needs, resolved by the runtime before the run.
#[derive(Clone)]
pub struct SyncContext {
    pub stream: StreamDescriptor,
    pub source: SourceDescriptor,
    pub state: StreamStateRow,
    /// Source-connection id, the key-layout path segment
    pub connection_id: String,
    pub db: PgPool,
    pub storage: Storage,
    pub tokens: Arc<TokenManager>,
    pub http: reqwest::Client,
}

/// Source-specific pull implementation.
///
/// A syncer fetches from the upstream API, writes raw batches through
/// `ctx.storage` under the canonical key layout, and reports what it
/// wrote. It must not touch signal or transition rows; that is the
/// processors' job.
#[async_trait]
pub trait Syncer: Send + Sync {
    async fn run(&mut self, window: SyncWindow) -> Result<SyncerRun>;
}
