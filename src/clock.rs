//! Session clock.
//!
//! Timestamps are epoch milliseconds with sub-millisecond precision. A clock captures a
//! wall-clock anchor once and adds monotonic elapsed time to it, so every timestamp taken
//! during one session (including the ones embedded in test payloads) is comparable.
//! Elapsed time is read from `tokio::time::Instant`, which follows the paused test clock.

use chrono::Utc;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct Clock {
    anchor: Instant,
    anchor_epoch_ms: f64,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            anchor: Instant::now(),
            anchor_epoch_ms: Utc::now().timestamp_micros() as f64 / 1000.0,
        }
    }

    /// Current time in epoch milliseconds
    pub fn now_ms(&self) -> f64 {
        let elapsed = Instant::now().saturating_duration_since(self.anchor);
        self.anchor_epoch_ms + elapsed.as_secs_f64() * 1000.0
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
