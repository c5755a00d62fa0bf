//! Loss probe.
//!
//! Sends 1024-byte chunks paced at one per 8 ms (about 1 Mbps) in at most two bursts of
//! roughly 128 kB, 250 ms apart. The first reply opens a 3 s window; when it closes, the
//! last received payload tells how many bytes the sender had produced up to that point,
//! and the shortfall is the loss.

use log::{debug, info, warn};

use super::measurement_test::Probe;
use super::payload::{Payload, PayloadGenerator};
use super::test_state::TestCore;
use super::timers::{ProbeContext, Timer};
use super::types::{LossResult, TestResult};
use crate::error_handling::types::TransportError;

pub const CHUNK_SIZE: usize = 1024;
pub const DURATION_MS: f64 = 3000.0;
const BURST_THRESHOLD: u64 = 1000 * CHUNK_SIZE as u64 / 8;
const MAX_BURSTS: u32 = 2;
const BURST_DELAY_MS: f64 = 250.0;
const CHUNK_INTERVAL_MS: f64 = 8.0;

/// `(claimed - received) / claimed`, or -1 when nothing is claimed.
pub fn fraction_lost(received: u64, claimed: u64) -> f64 {
    if claimed == 0 {
        return -1.0;
    }
    (claimed as f64 - received as f64) / claimed as f64
}

pub struct LossProbe {
    core: TestCore,
    generator: PayloadGenerator,
    sent_bytes: u64,
    received_bytes: u64,
    burst_bytes: u64,
    bursts: u32,
    last_message: Option<String>,
    window_open: bool,
    result: LossResult,
}

impl LossProbe {
    pub fn new() -> Self {
        Self {
            core: TestCore::new(),
            generator: PayloadGenerator::new(CHUNK_SIZE),
            sent_bytes: 0,
            received_bytes: 0,
            burst_bytes: 0,
            bursts: 0,
            last_message: None,
            window_open: false,
            result: LossResult {
                max_duration: DURATION_MS,
                bytes_sent: -1,
                fraction_lost_bytes: -1.0,
                ..Default::default()
            },
        }
    }

    fn send_chunk(&mut self, ctx: &mut ProbeContext<'_>) {
        let message = self.generator.make(ctx.now_ms(), self.sent_bytes);
        let len = message.len() as u64;
        ctx.send(message);
        self.sent_bytes += len;
        self.burst_bytes += len;

        if self.burst_bytes <= BURST_THRESHOLD {
            ctx.schedule(Timer::SendChunk, CHUNK_INTERVAL_MS);
            return;
        }

        self.bursts += 1;
        debug!("Loss burst {} done, {} bytes sent", self.bursts, self.sent_bytes);
        if self.bursts < MAX_BURSTS {
            ctx.schedule(Timer::NextBurst, BURST_DELAY_MS);
        }
    }

    fn end(&mut self, ctx: &mut ProbeContext<'_>) {
        self.stop(ctx);
        info!(
            "Loss: {} bytes sent, {} received, fraction lost {:.4}",
            self.result.sent_bytes, self.result.bytes_received, self.result.fraction_lost_bytes
        );
        self.core.finish();
    }

    fn fill_results(&mut self, now: f64) {
        self.result.end_timestamp = now;
        self.result.force_stopped = self.core.force_stopped();
        self.result.sent_bytes = self.sent_bytes;
        self.result.bytes_received = self.received_bytes;

        let claimed = self.last_message.as_deref().and_then(|message| {
            Payload::parse(message).map(|payload| payload.sent_bytes + message.len() as u64)
        });
        match claimed {
            Some(total) => {
                self.result.bytes_sent = i64::try_from(total).unwrap_or(i64::MAX);
                self.result.fraction_lost_bytes = fraction_lost(self.received_bytes, total);
            }
            None => {
                if self.last_message.is_some() {
                    warn!("Last loss reply is unparsable, loss unknown");
                }
                self.result.bytes_sent = -1;
                self.result.fraction_lost_bytes = -1.0;
            }
        }
    }
}

impl Default for LossProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl Probe for LossProbe {
    fn core(&self) -> &TestCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TestCore {
        &mut self.core
    }

    fn on_start(&mut self, ctx: &mut ProbeContext<'_>) {
        self.result.start_timestamp = ctx.now_ms();
        ctx.schedule(Timer::NextBurst, BURST_DELAY_MS);
        ctx.schedule(Timer::SilenceGuard, 2.0 * DURATION_MS);
    }

    fn on_message(&mut self, ctx: &mut ProbeContext<'_>, message: &str) {
        self.received_bytes += message.len() as u64;
        self.last_message = Some(message.to_string());

        if !self.window_open {
            self.window_open = true;
            ctx.cancel(Timer::SilenceGuard);
            ctx.schedule(Timer::Duration, DURATION_MS);
        }
    }

    fn on_error(&mut self, ctx: &mut ProbeContext<'_>, err: TransportError) {
        warn!("Loss test failed: {}", err);
        self.stop(ctx);
        self.core.fail(err.into());
    }

    fn on_timer(&mut self, ctx: &mut ProbeContext<'_>, timer: Timer) {
        match timer {
            Timer::NextBurst => {
                self.burst_bytes = 0;
                self.send_chunk(ctx);
            }
            Timer::SendChunk => self.send_chunk(ctx),
            Timer::Duration => self.end(ctx),
            Timer::SilenceGuard => {
                warn!("No loss replies within {} ms", 2.0 * DURATION_MS);
                self.end(ctx);
            }
            _ => {}
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
        TestResult::Loss(self.result.clone())
    }
}
