//! Drives one [`MeasurementTest`] to completion.
//!
//! The runner installs itself as the channel's only consumer, starts the test, and then
//! reacts to exactly three things until the completion fires: a preemption signal, a
//! channel event, or the earliest pending timer. The consumer is revoked before returning,
//! so the next test can install its own.

use log::{debug, warn};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

use super::measurement_test::MeasurementTest;
use super::timers::{ProbeContext, TimerQueue};
use crate::clock::Clock;
use crate::error_handling::types::{ProbeError, TransportError};
use crate::network::{ChannelEvent, Transport};

#[derive(Debug)]
pub struct RunOutcome {
    pub result: Result<(), ProbeError>,
    /// The test was force-stopped because the preemption signal changed
    pub preempted: bool,
}

pub async fn run_test(
    transport: &mut dyn Transport,
    clock: &Clock,
    test: &mut MeasurementTest,
    preempt: &mut watch::Receiver<u64>,
) -> RunOutcome {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let consumer = match transport.install_consumer(tx) {
        Ok(id) => id,
        Err(e) => {
            return RunOutcome {
                result: Err(ProbeError::Transport(e)),
                preempted: false,
            }
        }
    };

    let mut timers = TimerQueue::new();
    let (done_tx, mut done_rx) = oneshot::channel();
    let completion = Box::new(move |result: Result<(), ProbeError>| {
        let _ = done_tx.send(result);
    });

    let started = {
        let mut ctx = ProbeContext::new(&mut *transport, &mut timers, clock);
        test.start(&mut ctx, completion)
    };
    if let Err(e) = started {
        transport.revoke_consumer(consumer);
        return RunOutcome {
            result: Err(e),
            preempted: false,
        };
    }

    let mut preempted = false;
    let mut preempt_open = true;
    let mut channel_open = true;

    let result = loop {
        match done_rx.try_recv() {
            Ok(result) => break result,
            Err(oneshot::error::TryRecvError::Closed) => break Err(ProbeError::Abandoned),
            Err(oneshot::error::TryRecvError::Empty) => {}
        }

        let deadline = timers.next_deadline();
        tokio::select! {
            biased;

            changed = preempt.changed(), if preempt_open => {
                if changed.is_ok() {
                    preempted = true;
                    let mut ctx = ProbeContext::new(&mut *transport, &mut timers, clock);
                    test.force_stop(&mut ctx);
                } else {
                    preempt_open = false;
                }
            }
            event = rx.recv(), if channel_open => {
                let event = event.unwrap_or_else(|| {
                    channel_open = false;
                    ChannelEvent::Error(TransportError::ChannelClosed)
                });
                let mut ctx = ProbeContext::new(&mut *transport, &mut timers, clock);
                test.handle_event(&mut ctx, event);
            }
            _ = sleep_until(deadline), if deadline.is_some() => {
                while let Some(timer) = timers.pop_expired(Instant::now()) {
                    let mut ctx = ProbeContext::new(&mut *transport, &mut timers, clock);
                    test.handle_timer(&mut ctx, timer);
                }
            }
            else => {
                warn!("{} test can make no further progress", test.name());
                break Err(ProbeError::Abandoned);
            }
        }
    };

    transport.revoke_consumer(consumer);
    debug!("{} test completed: {:?}", test.name(), result);
    RunOutcome { result, preempted }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
