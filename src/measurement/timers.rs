use std::time::Duration;

use tokio::time::Instant;

use crate::clock::Clock;
use crate::network::Transport;

/// Timers a test can arm. At most one of each kind is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timer {
    /// RTT: no reply in time, send the next ping
    NextPing,
    /// RTT: last chance for the final reply
    FinalReply,
    /// Loss: start the next buffer-fill burst
    NextBurst,
    /// Loss: paced send of the next chunk
    SendChunk,
    /// Measurement window elapsed
    Duration,
    /// Nothing came back at all
    SilenceGuard,
    /// Throughput: polling fallback for the outbound buffer
    FillBuffer,
}

#[derive(Debug, Default)]
pub struct TimerQueue {
    entries: Vec<(Timer, Instant)>,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms `timer`, replacing a pending one of the same kind.
    pub fn schedule(&mut self, timer: Timer, delay: Duration) {
        self.cancel(timer);
        self.entries.push((timer, Instant::now() + delay));
    }

    pub fn cancel(&mut self, timer: Timer) {
        self.entries.retain(|(pending, _)| *pending != timer);
    }

    pub fn cancel_all(&mut self) {
        self.entries.clear();
    }

    pub fn is_scheduled(&self, timer: Timer) -> bool {
        self.entries.iter().any(|(pending, _)| *pending == timer)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.iter().map(|(_, deadline)| *deadline).min()
    }

    /// Removes and returns the earliest timer due at `now`.
    pub fn pop_expired(&mut self, now: Instant) -> Option<Timer> {
        let (index, _) = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, (_, deadline))| *deadline <= now)
            .min_by_key(|(_, (_, deadline))| *deadline)?;
        Some(self.entries.remove(index).0)
    }
}

/// What a test may touch while handling an event: the channel, its own timers and the
/// session clock.
pub struct ProbeContext<'a> {
    transport: &'a mut dyn Transport,
    timers: &'a mut TimerQueue,
    clock: &'a Clock,
}

impl<'a> ProbeContext<'a> {
    pub fn new(
        transport: &'a mut dyn Transport,
        timers: &'a mut TimerQueue,
        clock: &'a Clock,
    ) -> Self {
        Self {
            transport,
            timers,
            clock,
        }
    }

    pub fn send(&mut self, payload: String) {
        self.transport.send(payload);
    }

    pub fn now_ms(&self) -> f64 {
        self.clock.now_ms()
    }

    pub fn schedule(&mut self, timer: Timer, delay_ms: f64) {
        let delay = Duration::from_micros((delay_ms.max(0.0) * 1000.0).round() as u64);
        self.timers.schedule(timer, delay);
    }

    pub fn cancel(&mut self, timer: Timer) {
        self.timers.cancel(timer);
    }

    pub fn cancel_all(&mut self) {
        self.timers.cancel_all();
    }

    pub fn is_scheduled(&self, timer: Timer) -> bool {
        self.timers.is_scheduled(timer)
    }

    pub fn buffered_amount(&self) -> usize {
        self.transport.buffered_amount()
    }

    /// Returns `false` when the channel cannot notify and the caller must poll.
    pub fn enable_low_buffer(&mut self, threshold: usize) -> bool {
        self.transport.set_low_buffer_threshold(threshold)
    }
}
