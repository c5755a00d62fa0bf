use log::{debug, info};

use super::loss_probe::LossProbe;
use super::rtt_probe::RttProbe;
use super::test_state::{Completion, TestCore, TestState};
use super::throughput_probe::ThroughputProbe;
use super::timers::{ProbeContext, Timer};
use super::types::{TestName, TestResult};
use crate::error_handling::types::{ProbeError, TransportError};
use crate::network::ChannelEvent;

/// Per-variant behavior of a measurement test.
///
/// Hooks are only invoked while the test is active; [`MeasurementTest`] filters
/// everything else out. `stop` must move the core to `Stopped`, cancel pending timers and
/// fill in the results, and do nothing when the test is no longer active.
pub trait Probe {
    fn core(&self) -> &TestCore;
    fn core_mut(&mut self) -> &mut TestCore;

    fn on_start(&mut self, ctx: &mut ProbeContext<'_>);
    fn on_message(&mut self, ctx: &mut ProbeContext<'_>, message: &str);
    fn on_error(&mut self, ctx: &mut ProbeContext<'_>, err: TransportError);
    fn on_timer(&mut self, ctx: &mut ProbeContext<'_>, timer: Timer);

    fn on_buffer_low(&mut self, _ctx: &mut ProbeContext<'_>) {}

    fn stop(&mut self, ctx: &mut ProbeContext<'_>);

    fn results(&self) -> TestResult;
}

/// One of the three diagnostic tests.
pub enum MeasurementTest {
    Rtt(RttProbe),
    Loss(LossProbe),
    Throughput(ThroughputProbe),
}

impl MeasurementTest {
    pub fn rtt() -> Self {
        MeasurementTest::Rtt(RttProbe::new())
    }

    pub fn loss() -> Self {
        MeasurementTest::Loss(LossProbe::new())
    }

    /// `rtt` is a prior median in ms, `loss` the fraction from a prior loss test (-1 if unknown).
    pub fn throughput(rtt: Option<f64>, loss: f64) -> Self {
        MeasurementTest::Throughput(ThroughputProbe::new(rtt, loss))
    }

    pub fn name(&self) -> TestName {
        match self {
            MeasurementTest::Rtt(_) => TestName::Rtt,
            MeasurementTest::Loss(_) => TestName::Loss,
            MeasurementTest::Throughput(_) => TestName::Throughput,
        }
    }

    fn probe(&self) -> &dyn Probe {
        match self {
            MeasurementTest::Rtt(p) => p,
            MeasurementTest::Loss(p) => p,
            MeasurementTest::Throughput(p) => p,
        }
    }

    fn probe_mut(&mut self) -> &mut dyn Probe {
        match self {
            MeasurementTest::Rtt(p) => p,
            MeasurementTest::Loss(p) => p,
            MeasurementTest::Throughput(p) => p,
        }
    }

    pub fn state(&self) -> TestState {
        self.probe().core().state()
    }

    pub fn is_active(&self) -> bool {
        self.probe().core().is_active()
    }

    pub fn results(&self) -> TestResult {
        self.probe().results()
    }

    pub fn start(
        &mut self,
        ctx: &mut ProbeContext<'_>,
        completion: Completion,
    ) -> Result<(), ProbeError> {
        self.probe_mut().core_mut().start(completion)?;
        info!("Starting {} test", self.name());
        self.probe_mut().on_start(ctx);
        Ok(())
    }

    pub fn handle_event(&mut self, ctx: &mut ProbeContext<'_>, event: ChannelEvent) {
        if !self.is_active() {
            debug!("{} test not active, dropping {:?}", self.name(), event);
            return;
        }
        let probe = self.probe_mut();
        match event {
            ChannelEvent::Message(message) => probe.on_message(ctx, &message),
            ChannelEvent::Error(err) => probe.on_error(ctx, err),
            ChannelEvent::BufferedAmountLow => probe.on_buffer_low(ctx),
        }
    }

    pub fn handle_timer(&mut self, ctx: &mut ProbeContext<'_>, timer: Timer) {
        if !self.is_active() {
            return;
        }
        self.probe_mut().on_timer(ctx, timer);
    }

    /// Ends an active test from the outside: unsent work is dropped, partial counters are
    /// kept, and completion fires (once) as a success.
    pub fn force_stop(&mut self, ctx: &mut ProbeContext<'_>) {
        if !self.is_active() {
            return;
        }
        info!("Force stopping {} test", self.name());
        let probe = self.probe_mut();
        probe.core_mut().mark_force_stopped();
        probe.stop(ctx);
        probe.core_mut().finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::measurement::timers::TimerQueue;
    use crate::network::loopback::LoopbackTransport;
    use crate::network::Transport;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_force_stop_completes_once_and_silences_timers() {
        let mut transport = LoopbackTransport::new();
        transport.connect(&[]).await.unwrap();
        let clock = Clock::new();
        let mut timers = TimerQueue::new();

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut test = MeasurementTest::loss();
        {
            let mut ctx = ProbeContext::new(&mut transport, &mut timers, &clock);
            test.start(
                &mut ctx,
                Box::new(move |res| {
                    assert!(res.is_ok());
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        }
        assert!(!timers.is_empty());

        let mut ctx = ProbeContext::new(&mut transport, &mut timers, &clock);
        test.force_stop(&mut ctx);
        test.force_stop(&mut ctx);
        // a timer that was already due when the stop happened
        test.handle_timer(&mut ctx, Timer::Duration);
        test.handle_event(&mut ctx, ChannelEvent::Message("late".to_string()));
        drop(ctx);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(test.state(), TestState::Finished);
        assert!(timers.is_empty());
        assert!(test.results().force_stopped());
    }

    #[test]
    fn test_names() {
        assert_eq!(MeasurementTest::rtt().name().as_str(), "rtt");
        assert_eq!(MeasurementTest::loss().name(), TestName::Loss);
        assert_eq!(
            MeasurementTest::throughput(None, -1.0).name().to_string(),
            "throughput"
        );
        assert_eq!(MeasurementTest::rtt().state(), TestState::Idle);
    }
}
