//! Counters and task timing
//!
//! In-process counters plus a drop-safe task timer. Counters are plain
//! atomics exposed for logging and tests; structured logs carry the
//! same fields for anything downstream.

use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

lazy_static! {
    static ref COUNTERS: Mutex<HashMap<String, &'static AtomicU64>> = Mutex::new(HashMap::new());
}

/// Increment a named counter by `delta`.
pub fn count(name: &str, delta: u64) {
    let mut counters = COUNTERS.lock().expect("counter mutex poisoned");
    let counter = counters
        .entry(name.to_string())
        .or_insert_with(|| Box::leak(Box::new(AtomicU64::new(0))));
    counter.fetch_add(delta, Ordering::Relaxed);
}

/// Current value of a named counter.
pub fn counter_value(name: &str) -> u64 {
    COUNTERS
        .lock()
        .expect("counter mutex poisoned")
        .get(name)
        .map(|c| c.load(Ordering::Relaxed))
        .unwrap_or(0)
}

/// Snapshot of all counters, for the status CLI.
pub fn snapshot() -> Vec<(String, u64)> {
    let counters = COUNTERS.lock().expect("counter mutex poisoned");
    let mut entries: Vec<(String, u64)> = counters
        .iter()
        .map(|(name, counter)| (name.clone(), counter.load(Ordering::Relaxed)))
        .collect();
    entries.sort();
    entries
}

/// Times one task execution and records its outcome.
pub struct TaskTimer {
    task_name: String,
    started: Instant,
}

impl TaskTimer {
    pub fn start(task_name: &str) -> Self {
        count(&format!("task.{task_name}.started"), 1);
        Self {
            task_name: task_name.to_string(),
            started: Instant::now(),
        }
    }

    pub fn success(self) {
        let elapsed = self.started.elapsed();
        count(&format!("task.{}.succeeded", self.task_name), 1);
        tracing::info!(
            task = %self.task_name,
            duration_ms = elapsed.as_millis() as u64,
            "Task succeeded"
        );
    }

    pub fn failure(self, error_class: &str) {
        let elapsed = self.started.elapsed();
        count(&format!("task.{}.failed", self.task_name), 1);
        count(&format!("error.{error_class}"), 1);
        tracing::warn!(
            task = %self.task_name,
            error_class,
            duration_ms = elapsed.as_millis() as u64,
            "Task failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        count("test.alpha", 2);
        count("test.alpha", 3);
        assert_eq!(counter_value("test.alpha"), 5);
        assert_eq!(counter_value("test.missing"), 0);
    }

    #[test]
    fn test_task_timer_counts_outcomes() {
        let timer = TaskTimer::start("unit");
        timer.success();
        assert_eq!(counter_value("task.unit.started"), 1);
        assert_eq!(counter_value("task.unit.succeeded"), 1);

        let timer = TaskTimer::start("unit");
        timer.failure("validation");
        assert_eq!(counter_value("task.unit.failed"), 1);
        assert_eq!(counter_value("error.validation"), 1);
    }
}
