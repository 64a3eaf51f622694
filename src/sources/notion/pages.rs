//! Notion pages: semantic (versioned-document) stream
//!
//! Sync walks the search endpoint with opaque page cursors under a
//! ~3 req/s throttle (Notion's published limit). Processing hashes each
//! page and versions it through the semantics store; bodies land in the
//! object store, not in rows.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::normalize::content_hash;
use crate::processing::{ProcessorOutput, SemanticDoc, StreamProcessor};
use crate::registry::SignalDescriptor;
use crate::storage::RawBatch;
use crate::sync::{SyncContext, SyncWindow, Syncer, SyncerRun, Throttle};

const DEFAULT_BASE_URL: &str = "https://api.notion.com/v1";
const NOTION_VERSION: &str = "2022-06-28";
const DEFAULT_RATE_LIMIT: f64 = 3.0;
const PAGE_SIZE: usize = 100;

pub fn processor_factory() -> Box<dyn crate::processing::StreamProcessor> {
    Box::new(NotionPagesProcessor)
}

pub fn syncer_factory(ctx: SyncContext) -> Box<dyn Syncer> {
    Box::new(NotionPagesSyncer::new(ctx))
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<Value>,
    #[serde(default)]
    has_more: bool,
    next_cursor: Option<String>,
}

pub struct NotionPagesSyncer {
    ctx: SyncContext,
    throttle: Throttle,
    base_url: String,
}

impl NotionPagesSyncer {
    pub fn new(ctx: SyncContext) -> Self {
        let rate = ctx.stream.rate_limit_per_sec.unwrap_or(DEFAULT_RATE_LIMIT);
        Self {
            throttle: Throttle::per_second(rate),
            base_url: std::env::var("NOTION_API_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            ctx,
        }
    }

    async fn search_page(&self, cursor: Option<&str>, token: &str) -> Result<SearchResponse> {
        self.throttle.acquire().await;

        let mut body = json!({
            "filter": {"property": "object", "value": "page"},
            "sort": {"direction": "descending", "timestamp": "last_edited_time"},
            "page_size": PAGE_SIZE,
        });
        if let Some(cursor) = cursor {
            body["start_cursor"] = json!(cursor);
        }

        let response = self
            .ctx
            .http
            .post(format!("{}/search", self.base_url))
            .bearer_auth(token)
            .header("Notion-Version", NOTION_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::UpstreamTransient(format!("notion: {e}")))?;

        let status = response.status();
        match status {
            s if s.is_success() => response
                .json()
                .await
                .map_err(|e| Error::UpstreamSchema(format!("notion response: {e}"))),
            reqwest::StatusCode::UNAUTHORIZED => {
                Err(Error::AuthRefreshFailed("notion rejected token".to_string()))
            }
            reqwest::StatusCode::BAD_REQUEST => Err(Error::CursorInvalidated(
                "notion rejected start_cursor".to_string(),
            )),
            reqwest::StatusCode::TOO_MANY_REQUESTS => {
                Err(Error::UpstreamTransient("notion rate limited".to_string()))
            }
            s if s.is_server_error() => {
                Err(Error::UpstreamTransient(format!("notion returned {s}")))
            }
            s => Err(Error::UpstreamSchema(format!("notion returned {s}"))),
        }
    }
}

#[async_trait]
impl Syncer for NotionPagesSyncer {
    #[tracing::instrument(skip(self, window), fields(stream = %self.ctx.stream.name))]
    async fn run(&mut self, window: SyncWindow) -> Result<SyncerRun> {
        let provider = self
            .ctx
            .source
            .oauth
            .clone()
            .ok_or_else(|| Error::AuthMissing("notion oauth not configured".to_string()))?;
        let token = self
            .ctx
            .tokens
            .get_valid_token(&self.ctx.source.name, &provider)
            .await?;

        let mut run = SyncerRun::default();
        let mut cursor = window.cursor().map(String::from);

        loop {
            let page = self.search_page(cursor.as_deref(), &token).await?;
            if !page.results.is_empty() {
                run.records_fetched += page.results.len();
                let mut batch = RawBatch::with_data(
                    &self.ctx.stream.name,
                    &self.ctx.source.name,
                    page.results,
                );
                batch.sync_metadata = Some(json!({"synced_at": Utc::now()}));
                let key = self
                    .ctx
                    .storage
                    .put_raw_batch(&batch, &self.ctx.connection_id, Utc::now())
                    .await?;
                run.batch_keys.push(key);
            }

            if page.has_more {
                if page.next_cursor.is_none() {
                    return Err(Error::UpstreamSchema(
                        "notion reported has_more without a cursor".to_string(),
                    ));
                }
                cursor = page.next_cursor;
            } else {
                // Search has no durable resume token; a finished walk
                // clears the cursor so the next sync starts fresh
                run.next_cursor = None;
                break;
            }
        }
        Ok(run)
    }
}

pub struct NotionPagesProcessor;

impl StreamProcessor for NotionPagesProcessor {
    fn process(&self, batch: &RawBatch, _enabled: &[&SignalDescriptor]) -> Result<ProcessorOutput> {
        let mut output = ProcessorOutput::default();

        for page in batch.entries() {
            match transform_page(&batch.stream_name, page) {
                Some(doc) => output.semantics.push(doc),
                None => output.skipped += 1,
            }
        }
        Ok(output)
    }
}

fn transform_page(stream_name: &str, page: &Value) -> Option<SemanticDoc> {
    let page_id = page["id"].as_str()?;
    if page["archived"].as_bool() == Some(true) {
        return None;
    }

    let updated_at = page["last_edited_time"]
        .as_str()
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    Some(SemanticDoc {
        semantic_name: stream_name.to_string(),
        semantic_id: page_id.to_string(),
        title: extract_title(page),
        summary: page["url"].as_str().map(String::from),
        content_hash: content_hash(page),
        body: serde_json::to_vec(page).ok()?,
        updated_at,
    })
}

/// Title lives under whichever property has `"type": "title"`.
fn extract_title(page: &Value) -> Option<String> {
    let properties = page["properties"].as_object()?;
    for property in properties.values() {
        if property["type"].as_str() == Some("title") {
            let spans = property["title"].as_array()?;
            let title: String = spans
                .iter()
                .filter_map(|span| span["plain_text"].as_str())
                .collect();
            if !title.is_empty() {
                return Some(title);
            }
        }
    }
    None
}
