//! Round-trip time probe.
//!
//! Sends up to [`RTT_SAMPLES`] pings, each carrying its send timestamp as plain text. A
//! reply triggers the next ping right away; a missing reply triggers it after
//! [`PING_TIMEOUT_MS`]. After the last ping the probe waits at most [`FINAL_TIMEOUT_MS`]
//! for one more reply before computing the metrics.

use log::{debug, info, warn};

use super::measurement_test::Probe;
use super::test_state::TestCore;
use super::timers::{ProbeContext, Timer};
use super::types::{RttResult, TestResult};
use crate::error_handling::types::TransportError;

pub const RTT_SAMPLES: u32 = 10;
pub const PING_TIMEOUT_MS: f64 = 100.0;
pub const FINAL_TIMEOUT_MS: f64 = 500.0;

/// Median of the samples: the element at index n/2 of the sorted list, so even-length
/// input yields the upper-middle value. Empty input yields [`FINAL_TIMEOUT_MS`].
pub fn median(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return FINAL_TIMEOUT_MS;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted[sorted.len() / 2]
}

pub fn average(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return FINAL_TIMEOUT_MS;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

/// Population variance; [`FINAL_TIMEOUT_MS`] for no samples.
pub fn variance(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return FINAL_TIMEOUT_MS;
    }
    let mean = average(samples);
    samples.iter().map(|rtt| (rtt - mean).powi(2)).sum::<f64>() / samples.len() as f64
}

/// Population standard deviation, 0 when the variance is not positive.
pub fn std_dev(samples: &[f64]) -> f64 {
    let variance = variance(samples);
    if variance <= 0.0 {
        return 0.0;
    }
    variance.sqrt()
}

pub struct RttProbe {
    core: TestCore,
    count_sent: u32,
    rtts: Vec<f64>,
    result: RttResult,
}

impl RttProbe {
    pub fn new() -> Self {
        Self {
            core: TestCore::new(),
            count_sent: 0,
            rtts: Vec::new(),
            result: RttResult {
                max_messages: RTT_SAMPLES,
                max_duration: PING_TIMEOUT_MS * f64::from(RTT_SAMPLES - 1) + FINAL_TIMEOUT_MS,
                ..Default::default()
            },
        }
    }

    fn send_ping(&mut self, ctx: &mut ProbeContext<'_>) {
        let now = ctx.now_ms();
        ctx.send(now.to_string());
        self.count_sent += 1;

        if self.count_sent < RTT_SAMPLES {
            ctx.cancel(Timer::FinalReply);
            ctx.schedule(Timer::NextPing, PING_TIMEOUT_MS);
        } else {
            ctx.cancel(Timer::NextPing);
            ctx.schedule(Timer::FinalReply, FINAL_TIMEOUT_MS);
        }
    }

    fn finalize(&mut self, ctx: &mut ProbeContext<'_>) {
        self.stop(ctx);
        info!(
            "RTT: {} sent, {} answered, median {:.2} ms, jitter {:.2} ms",
            self.result.sent_messages,
            self.rtts.len(),
            self.result.median,
            self.result.variance
        );
        self.core.finish();
    }

    fn fill_results(&mut self, now: f64) {
        self.result.sent_messages = self.count_sent;
        self.result.un_acked_messages = self.count_sent.saturating_sub(self.rtts.len() as u32);
        self.result.force_stopped = self.core.force_stopped();
        self.result.median = median(&self.rtts);
        self.result.average = average(&self.rtts);
        self.result.variance = std_dev(&self.rtts);
        self.result.end_timestamp = now;
    }
}

impl Default for RttProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl Probe for RttProbe {
    fn core(&self) -> &TestCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TestCore {
        &mut self.core
    }

    fn on_start(&mut self, ctx: &mut ProbeContext<'_>) {
        self.result.start_timestamp = ctx.now_ms();
        self.send_ping(ctx);
    }

    fn on_message(&mut self, ctx: &mut ProbeContext<'_>, message: &str) {
        match message.trim().parse::<f64>() {
            Ok(sent) => {
                let rtt = ctx.now_ms() - sent;
                debug!("RTT sample {:.3} ms", rtt);
                self.rtts.push(rtt);
            }
            Err(_) => warn!("Ignoring unparsable RTT reply ({} bytes)", message.len()),
        }

        if self.count_sent < RTT_SAMPLES {
            self.send_ping(ctx);
        } else {
            self.finalize(ctx);
        }
    }

    fn on_error(&mut self, ctx: &mut ProbeContext<'_>, err: TransportError) {
        warn!("RTT test failed: {}", err);
        ctx.cancel_all();
        self.fill_results(ctx.now_ms());
        self.core.fail(err.into());
    }

    fn on_timer(&mut self, ctx: &mut ProbeContext<'_>, timer: Timer) {
        match timer {
            Timer::NextPing => self.send_ping(ctx),
            Timer::FinalReply => self.finalize(ctx),
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
        TestResult::Rtt(self.result.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median_tie_break_is_upper_middle() {
        assert_eq!(median(&[]), 500.0);
        assert_eq!(median(&[10.0, 20.0, 30.0]), 20.0);
        assert_eq!(median(&[10.0, 20.0, 30.0, 40.0]), 30.0);
        assert_eq!(median(&[40.0, 10.0, 30.0, 20.0]), 30.0);
    }

    #[test]
    fn test_median_sorts_numerically() {
        // lexicographic ordering would put 100 before 9
        assert_eq!(median(&[100.0, 9.0, 20.0]), 20.0);
    }

    #[test]
    fn test_average_and_std_dev() {
        assert_eq!(average(&[]), 500.0);
        assert_eq!(average(&[10.0, 20.0, 30.0]), 20.0);

        let samples = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_eq!(variance(&samples), 4.0);
        assert_eq!(std_dev(&samples), 2.0);

        assert_eq!(std_dev(&[3.0, 3.0, 3.0]), 0.0);
        assert!((std_dev(&[]) - 500f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_max_duration() {
        let probe = RttProbe::new();
        match probe.results() {
            TestResult::Rtt(r) => {
                assert_eq!(r.max_duration, 1400.0);
                assert_eq!(r.max_messages, 10);
            }
            other => panic!("unexpected result {:?}", other),
        }
    }
}
