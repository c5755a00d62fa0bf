//! Throughput probe.
//!
//! The sender keeps the outbound buffer filled up to [`BUFFER_FULL_THRESHOLD`] bytes,
//! refilling on the channel's low-buffer notification when available and by polling every
//! 250 ms otherwise, and stops producing once 1 MB has been queued. The receiving side
//! measures over a window that opens with the first reply:
//!
//! - 100 ms intervals with their own rate and the RTT of the last payload seen
//! - the whole window, and separately the part after its midpoint
//!
//! The reported average is the larger of the two window rates, so ramp-up time does not
//! drag the figure down.

use log::{debug, info, warn};

use super::measurement_test::Probe;
use super::payload::{Payload, PayloadGenerator};
use super::test_state::TestCore;
use super::timers::{ProbeContext, Timer};
use super::types::{TestResult, ThroughputInterval, ThroughputResult};
use crate::error_handling::types::TransportError;

pub const CHUNK_SIZE: usize = 1200;
pub const BUFFER_FULL_THRESHOLD: usize = 1000 * CHUNK_SIZE;
pub const MAX_QUEUED_BYTES: u64 = 1_000_000;
pub const DEFAULT_DURATION_MS: f64 = 5000.0;
const MIN_DURATION_MS: f64 = 1000.0;
const MAX_DURATION_MS: f64 = 10_000.0;
const RTTS_PER_TEST: f64 = 50.0;
const INTERVAL_MS: f64 = 100.0;
const POLL_INTERVAL_MS: f64 = 250.0;

/// Window length: 50 round trips bounded to 1..10 s, or 5 s without an RTT estimate.
pub fn test_duration(rtt: Option<f64>) -> f64 {
    match rtt {
        Some(rtt) if rtt.is_finite() => {
            (RTTS_PER_TEST * rtt).clamp(MIN_DURATION_MS, MAX_DURATION_MS)
        }
        _ => DEFAULT_DURATION_MS,
    }
}

/// kbps, with 1 kbit = 1024 bit. Zero for an empty span.
pub fn average_throughput(bytes: u64, milliseconds: f64) -> f64 {
    if milliseconds == 0.0 {
        return 0.0;
    }
    let seconds = milliseconds / 1000.0;
    (bytes as f64 / seconds) * 8.0 / 1024.0
}

pub struct ThroughputProbe {
    core: TestCore,
    generator: PayloadGenerator,
    duration: f64,
    loss: f64,
    use_polling: bool,
    sending_done: bool,
    sent_bytes: u64,
    received_bytes: u64,
    buffer_empty: u32,
    window_start: Option<f64>,
    last_received: Option<f64>,
    second_half_start: Option<f64>,
    second_half_bytes: u64,
    interval_start: Option<f64>,
    interval_bytes: u64,
    intervals: Vec<ThroughputInterval>,
    result: ThroughputResult,
}

impl ThroughputProbe {
    pub fn new(rtt: Option<f64>, loss: f64) -> Self {
        let duration = test_duration(rtt);
        Self {
            core: TestCore::new(),
            generator: PayloadGenerator::new(CHUNK_SIZE),
            duration,
            loss,
            use_polling: true,
            sending_done: false,
            sent_bytes: 0,
            received_bytes: 0,
            buffer_empty: 1,
            window_start: None,
            last_received: None,
            second_half_start: None,
            second_half_bytes: 0,
            interval_start: None,
            interval_bytes: 0,
            intervals: Vec::new(),
            result: ThroughputResult {
                max_duration: duration,
                buffer_empty: 1,
                fraction_lost_bytes: loss,
                ..Default::default()
            },
        }
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    fn fill_buffer(&mut self, ctx: &mut ProbeContext<'_>) {
        if self.sending_done {
            return;
        }
        // the low-buffer notification may be handled after the buffer already drained
        if ctx.buffered_amount() == 0 {
            self.buffer_empty += 1;
        }

        while self.sent_bytes <= MAX_QUEUED_BYTES {
            if ctx.buffered_amount() > BUFFER_FULL_THRESHOLD {
                if self.use_polling {
                    ctx.schedule(Timer::FillBuffer, POLL_INTERVAL_MS);
                }
                return;
            }
            let message = self.generator.make(ctx.now_ms(), self.sent_bytes);
            self.sent_bytes += message.len() as u64;
            ctx.send(message);
        }

        debug!("Throughput sender done after {} bytes", self.sent_bytes);
        self.sending_done = true;
    }

    fn end(&mut self, ctx: &mut ProbeContext<'_>) {
        self.stop(ctx);
        info!(
            "Throughput: {:.1} kbps over {} ms, {} of {} bytes received",
            self.result.average, self.duration, self.result.bytes_received, self.result.bytes_prepared
        );
        self.core.finish();
    }

    fn fill_results(&mut self, now: f64) {
        let end = self.last_received.unwrap_or(now);
        let start = self.window_start.unwrap_or(end);

        self.result.start_timestamp = start;
        self.result.end_timestamp = end;
        self.result.force_stopped = self.core.force_stopped();
        self.result.buffer_empty = self.buffer_empty;
        self.result.intervals = self.intervals.clone();
        self.result.bytes_prepared = self.sent_bytes;
        self.result.bytes_received = self.received_bytes;

        let second_half = match self.second_half_start {
            Some(half_start) => average_throughput(self.second_half_bytes, end - half_start),
            None => 0.0,
        };
        let whole = average_throughput(self.received_bytes, end - start);
        self.result.average = second_half.max(whole);
        self.result.fraction_lost_bytes = self.loss;
    }
}

impl Probe for ThroughputProbe {
    fn core(&self) -> &TestCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TestCore {
        &mut self.core
    }

    fn on_start(&mut self, ctx: &mut ProbeContext<'_>) {
        self.use_polling = !ctx.enable_low_buffer(BUFFER_FULL_THRESHOLD / 10);
        if self.use_polling {
            debug!("Low-buffer notification unavailable, polling the outbound buffer");
        }
        ctx.schedule(Timer::SilenceGuard, 2.0 * self.duration);
        self.fill_buffer(ctx);
    }

    fn on_message(&mut self, ctx: &mut ProbeContext<'_>, message: &str) {
        let now = ctx.now_ms();
        let len = message.len() as u64;
        self.last_received = Some(now);
        self.received_bytes += len;

        let window_start = match self.window_start {
            Some(start) => start,
            None => {
                self.window_start = Some(now);
                ctx.cancel(Timer::SilenceGuard);
                ctx.schedule(Timer::Duration, self.duration);
                now
            }
        };

        let interval_start = *self.interval_start.get_or_insert(now);
        self.interval_bytes += len;
        if now - interval_start >= INTERVAL_MS {
            let elapsed = now - interval_start;
            let interval = ThroughputInterval {
                start_timestamp: interval_start,
                end_timestamp: now,
                bytes_received: self.interval_bytes,
                average: average_throughput(self.interval_bytes, elapsed),
                rtt: Payload::parse(message).map(|payload| now - payload.timestamp),
            };
            debug!(
                "Interval {:.1} kbps, rtt {:?}",
                interval.average, interval.rtt
            );
            self.intervals.push(interval);
            self.interval_start = Some(now);
            self.interval_bytes = 0;
        }

        if now - window_start > self.duration / 2.0 {
            self.second_half_start.get_or_insert(now);
            self.second_half_bytes += len;
        }
    }

    fn on_error(&mut self, ctx: &mut ProbeContext<'_>, err: TransportError) {
        warn!("Throughput test failed: {}", err);
        self.stop(ctx);
        self.core.fail(err.into());
    }

    fn on_timer(&mut self, ctx: &mut ProbeContext<'_>, timer: Timer) {
        match timer {
            Timer::FillBuffer => self.fill_buffer(ctx),
            Timer::Duration => self.end(ctx),
            Timer::SilenceGuard => {
                warn!("No throughput replies within {} ms", 2.0 * self.duration);
                self.end(ctx);
            }
            _ => {}
        }
    }

    fn on_buffer_low(&mut self, ctx: &mut ProbeContext<'_>) {
        if !self.use_polling {
            self.fill_buffer(ctx);
        }
    }

    fn stop(&mut self, ctx: &mut ProbeContext<'_>) {
        if !self.core.stop() {
            return;
        }
        ctx.cancel_all();
        self.fill_results(ctx.now_ms());
    }

    fn results(&self) -> TestResult {
        TestResult::Throughput(self.result.clone())
    }
}
