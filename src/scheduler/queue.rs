//! Durable work queue over Redis
//!
//! One FIFO list per logical queue name carries ready tasks; a sorted
//! set holds delayed tasks keyed by their eta. Consumers pop with a
//! blocking read after pumping due delayed tasks across. Delivery is
//! at-least-once; handlers are idempotent or dedup on write.

use chrono::{DateTime, Duration, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::tasks::{Task, TaskEnvelope};
use crate::error::{Error, Result};

/// Default logical queue.
pub const DEFAULT_QUEUE: &str = "meridian";

#[derive(Clone)]
pub struct TaskQueue {
    conn: ConnectionManager,
    queue_name: String,
}

impl TaskQueue {
    pub async fn connect(redis_url: &str, queue_name: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| Error::Queue(format!("invalid redis url: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| Error::Queue(format!("redis unreachable: {e}")))?;
        Ok(Self {
            conn,
            queue_name: queue_name.to_string(),
        })
    }

    fn ready_key(&self) -> String {
        format!("queue:{}", self.queue_name)
    }

    fn delayed_key(&self) -> String {
        format!("queue:{}:delayed", self.queue_name)
    }

    /// Enqueue a task for immediate execution.
    pub async fn enqueue(&self, task: &Task) -> Result<uuid::Uuid> {
        let envelope = TaskEnvelope::new(task)?;
        self.push_envelope(&envelope).await?;
        tracing::debug!(task = task.name(), id = %envelope.id, "Enqueued task");
        Ok(envelope.id)
    }

    /// Enqueue a task to run no earlier than `delay` from now.
    pub async fn enqueue_in(&self, task: &Task, delay: std::time::Duration) -> Result<uuid::Uuid> {
        let mut envelope = TaskEnvelope::new(task)?;
        let eta = Utc::now() + Duration::from_std(delay).unwrap_or(Duration::zero());
        envelope.eta = Some(eta);
        self.push_delayed(&envelope, eta).await?;
        Ok(envelope.id)
    }

    /// Re-enqueue a failed envelope with its retry count bumped, after
    /// `delay`.
    pub async fn requeue(&self, mut envelope: TaskEnvelope, delay: std::time::Duration) -> Result<()> {
        envelope.retries += 1;
        let eta = Utc::now() + Duration::from_std(delay).unwrap_or(Duration::zero());
        envelope.eta = Some(eta);
        self.push_delayed(&envelope, eta).await
    }

    async fn push_envelope(&self, envelope: &TaskEnvelope) -> Result<()> {
        let body = serde_json::to_string(envelope)?;
        let mut conn = self.conn.clone();
        let _: () = conn.lpush(self.ready_key(), body).await?;
        Ok(())
    }

    async fn push_delayed(&self, envelope: &TaskEnvelope, eta: DateTime<Utc>) -> Result<()> {
        let body = serde_json::to_string(envelope)?;
        let mut conn = self.conn.clone();
        let _: () = conn
            .zadd(self.delayed_key(), body, eta.timestamp_millis())
            .await?;
        Ok(())
    }

    /// Move due delayed tasks onto the ready list.
    async fn pump_delayed(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let now = Utc::now().timestamp_millis();
        let due: Vec<String> = conn
            .zrangebyscore(self.delayed_key(), i64::MIN, now)
            .await?;
        for body in due {
            let removed: i64 = conn.zrem(self.delayed_key(), &body).await?;
            // Another consumer may have pumped it first
            if removed == 1 {
                let _: () = conn.lpush(self.ready_key(), &body).await?;
            }
        }
        Ok(())
    }

    /// Pop the next ready envelope, blocking up to `timeout`. Expired
    /// envelopes are dropped. Returns `None` on timeout.
    pub async fn pop(&self, timeout: std::time::Duration) -> Result<Option<TaskEnvelope>> {
        self.pump_delayed().await?;

        let mut conn = self.conn.clone();
        let popped: Option<(String, String)> = conn
            .brpop(self.ready_key(), timeout.as_secs_f64())
            .await?;

        let Some((_, body)) = popped else {
            return Ok(None);
        };
        let envelope: TaskEnvelope = serde_json::from_str(&body)
            .map_err(|e| Error::Queue(format!("corrupt envelope: {e}")))?;

        if envelope.is_expired(Utc::now()) {
            tracing::warn!(id = %envelope.id, task = %envelope.task, "Dropping expired task");
            return Ok(None);
        }
        Ok(Some(envelope))
    }

    /// Ready-list depth, for observability.
    pub async fn depth(&self) -> Result<u64> {
        let mut conn = self.conn.clone();
        let depth: u64 = conn.llen(self.ready_key()).await?;
        Ok(depth)
    }
}
