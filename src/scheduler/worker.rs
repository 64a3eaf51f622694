//! Worker pool draining the shared task queue

use std::sync::Arc;
use std::time::Duration;

use super::handlers;
use super::tasks::TaskEnvelope;
use crate::client::Meridian;
use crate::error::{Error, Result};
use crate::observability::TaskTimer;

/// Blocking-pop timeout; also the worker's shutdown poll interval.
const POP_TIMEOUT: Duration = Duration::from_secs(5);
/// Base delay for queue-level retry backoff.
const RETRY_BASE: Duration = Duration::from_secs(60);

pub struct WorkerPool {
    app: Arc<Meridian>,
}

impl WorkerPool {
    pub fn new(app: Arc<Meridian>) -> Self {
        Self { app }
    }

    /// Run the pool until the process is stopped. Each worker loops
    /// pop -> decode -> execute-with-deadline -> retry-or-drop.
    pub async fn run(&self) -> Result<()> {
        let concurrency = self.app.config.worker_concurrency.max(1);
        tracing::info!(concurrency, "Starting workers");

        let mut handles = Vec::with_capacity(concurrency);
        for worker_id in 0..concurrency {
            let app = self.app.clone();
            handles.push(tokio::spawn(async move {
                worker_loop(app, worker_id).await;
            }));
        }
        for handle in handles {
            handle
                .await
                .map_err(|e| Error::Other(format!("worker panicked: {e}")))?;
        }
        Ok(())
    }
}

async fn worker_loop(app: Arc<Meridian>, worker_id: usize) {
    loop {
        let envelope = match app.queue.pop(POP_TIMEOUT).await {
            Ok(Some(envelope)) => envelope,
            Ok(None) => continue,
            Err(e) => {
                tracing::error!(worker_id, error = %e, "Queue pop failed");
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            }
        };

        if let Err(e) = execute(&app, envelope).await {
            tracing::error!(worker_id, error = %e, "Task handling failed terminally");
        }
    }
}

/// Execute one envelope with its kind's deadline; retry transient
/// failures with exponential backoff while the budget lasts.
async fn execute(app: &Meridian, envelope: TaskEnvelope) -> Result<()> {
    let task = match envelope.decode() {
        Ok(task) => task,
        Err(e) => {
            // Undecodable envelopes cannot be retried into validity
            tracing::error!(id = %envelope.id, error = %e, "Dropping undecodable task");
            return Ok(());
        }
    };

    let timer = TaskTimer::start(task.name());
    let outcome = tokio::time::timeout(task.deadline(), handlers::handle(app, task.clone())).await;

    let error = match outcome {
        Ok(Ok(())) => {
            timer.success();
            return Ok(());
        }
        Ok(Err(e)) => e,
        Err(_) => Error::Cancelled(format!("{} exceeded deadline", task.name())),
    };
    timer.failure(error.class());

    let retryable = error.is_retryable() && envelope.retries < task.max_retries();
    if retryable {
        let delay = RETRY_BASE * 2u32.saturating_pow(envelope.retries);
        tracing::warn!(
            id = %envelope.id,
            task = task.name(),
            retries = envelope.retries,
            delay_secs = delay.as_secs(),
            error = %error,
            "Task failed, requeueing"
        );
        app.queue.requeue(envelope, delay).await?;
        Ok(())
    } else {
        tracing::error!(
            id = %envelope.id,
            task = task.name(),
            retries = envelope.retries,
            error = %error,
            "Task failed, not retrying"
        );
        Ok(())
    }
}
