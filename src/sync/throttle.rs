//! In-process request throttle for rate-limited providers

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Simple interval throttle: callers await their turn so the request
/// rate never exceeds `per_second`.
pub struct Throttle {
    interval: Duration,
    next_slot: Mutex<Instant>,
}

impl Throttle {
    pub fn per_second(per_second: f64) -> Self {
        let interval = if per_second > 0.0 {
            Duration::from_secs_f64(1.0 / per_second)
        } else {
            Duration::ZERO
        };
        Self {
            interval,
            next_slot: Mutex::new(Instant::now()),
        }
    }

    /// Wait until a request slot is available.
    pub async fn acquire(&self) {
        let wait = {
            let mut next = self.next_slot.lock().expect("throttle mutex poisoned");
            let now = Instant::now();
            let at = (*next).max(now);
            *next = at + self.interval;
            at.saturating_duration_since(now)
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}
