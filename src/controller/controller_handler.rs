use std::sync::{Mutex, MutexGuard};

use log::{debug, error, info, warn};
use tokio::sync::watch;

use crate::clock::Clock;
use crate::configuration::config::Config;
use crate::configuration::types::{ConnectSettings, IceServer, TransportKind};
use crate::error_handling::types::*;
use crate::measurement::{run_test, MeasurementTest, TestName, TestResult};
use crate::network::loopback::LoopbackTransport;
use crate::network::udp_relay::UdpRelayTransport;
use crate::network::Transport;
use crate::session_management::public_result::PublicResult;
use crate::session_management::results_handler::ResultsAggregator;
use crate::session_management::session::SessionReport;

/// Builds a fresh, unconnected transport for every connection attempt.
pub type TransportFactory = Box<dyn Fn() -> Box<dyn Transport> + Send + Sync>;

/// The fixed test sequence of a session.
const TEST_SEQUENCE: [TestName; 3] = [TestName::Rtt, TestName::Loss, TestName::Throughput];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Connecting,
    Testing,
    Finalizing,
    Done,
}

impl Phase {
    fn in_progress(&self) -> bool {
        matches!(self, Phase::Connecting | Phase::Testing | Phase::Finalizing)
    }
}

struct ControllerState {
    phase: Phase,
    calls_in_progress: usize,
    aggregator: Option<ResultsAggregator>,
    last_report: Option<SessionReport>,
}

/// Top-level orchestrator of a diagnostic session.
///
/// A controller is meant to be shared (`Arc<ConnectivityController>`): one task awaits
/// [`ConnectivityController::start`] while others report call activity through
/// [`ConnectivityController::call_starts`] and [`ConnectivityController::call_finished`].
///
/// # Fields Overview
///
/// - `platform_disabled`: refuse every session up front
/// - `settings`: retry budget and connect watchdog durations
/// - `factory`: the transport implementation, chosen once at composition time
/// - `state`: phase, call counter and the session being built; never locked across an await
/// - `preempt`: bumped by `call_starts`, observed by the connect step and the running test
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use relay_probe::configuration::config::Config;
/// use relay_probe::controller::controller_handler::ConnectivityController;
///
/// # async fn demo(config: Config) {
/// let servers = config.ice_servers.clone();
/// let controller = Arc::new(ConnectivityController::from_config(config));
/// match controller.start(&servers).await {
///     Ok(summary) => println!("rtt: {:?}", summary.rtt),
///     Err(e) => eprintln!("{}", e),
/// }
/// # }
/// ```
pub struct ConnectivityController {
    platform_disabled: bool,
    settings: ConnectSettings,
    factory: TransportFactory,
    state: Mutex<ControllerState>,
    preempt: watch::Sender<u64>,
}

enum ConnectOutcome {
    Connected,
    Failed(ConnectError),
    Preempted,
}

impl ConnectivityController {
    pub fn new(config: &Config, factory: TransportFactory) -> Self {
        let (preempt, _) = watch::channel(0u64);
        Self {
            platform_disabled: config.platform_disabled,
            settings: config.connect.clone(),
            factory,
            state: Mutex::new(ControllerState {
                phase: Phase::Idle,
                calls_in_progress: 0,
                aggregator: None,
                last_report: None,
            }),
            preempt,
        }
    }

    /// Picks the transport named by `config.transport`.
    pub fn from_config(config: Config) -> Self {
        let factory: TransportFactory = match config.transport {
            TransportKind::Loopback => Box::new(|| Box::new(LoopbackTransport::new())),
            TransportKind::Udp => {
                let settings = config.connect.clone();
                Box::new(move || Box::new(UdpRelayTransport::new(settings.clone())))
            }
        };
        Self::new(&config, factory)
    }

    fn state(&self) -> MutexGuard<'_, ControllerState> {
        // a panicking holder cannot leave the state half-written, so keep going
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.state().phase
    }

    pub fn calls_in_progress(&self) -> usize {
        self.state().calls_in_progress
    }

    /// Full report of the most recent session, successful or not.
    pub fn last_report(&self) -> Option<SessionReport> {
        self.state().last_report.clone()
    }

    /// Runs one diagnostic session against `servers`.
    ///
    /// # Errors
    /// - the four "Not started" rejections, checked in that order, without touching state
    /// - `ControllerError::Connection` with the last error when a fatal connect failure
    /// occurs or the continuable failures reach the retry budget
    pub async fn start(&self, servers: &[IceServer]) -> Result<PublicResult, ControllerError> {
        let clock = Clock::new();
        let mut preempt = {
            let mut state = self.state();
            if self.platform_disabled {
                return Err(ControllerError::DisabledPlatform);
            }
            if state.phase.in_progress() {
                return Err(ControllerError::AlreadyInProgress);
            }
            if state.calls_in_progress > 0 {
                return Err(ControllerError::CallInProgress);
            }
            if servers.is_empty() {
                return Err(ControllerError::NoServersGiven);
            }

            let aggregator = ResultsAggregator::new(clock);
            info!(
                "Starting diagnostic session {} with {} server(s)",
                aggregator.id(),
                servers.len()
            );
            state.aggregator = Some(aggregator);
            state.phase = Phase::Connecting;
            self.preempt.subscribe()
        };

        let mut transport = (self.factory)();
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            debug!("Connect attempt {}", attempt);

            let outcome = tokio::select! {
                biased;

                changed = preempt.changed() => match changed {
                    Ok(()) => ConnectOutcome::Preempted,
                    Err(_) => ConnectOutcome::Failed(ConnectError::fatal(ConnectFailure::Setup(
                        "preemption signal dropped".to_string(),
                    ))),
                },
                result = transport.connect(servers) => match result {
                    Ok(()) => ConnectOutcome::Connected,
                    Err(e) => ConnectOutcome::Failed(e),
                },
            };

            match outcome {
                ConnectOutcome::Connected => {
                    info!("Channel open after {} attempt(s)", attempt);
                    self.with_aggregator(|agg| agg.set_status_success());
                    break;
                }
                ConnectOutcome::Preempted => {
                    info!("Call started while connecting, finalizing");
                    return Ok(self.finalize(transport.as_mut(), &clock).await);
                }
                ConnectOutcome::Failed(e) => {
                    let failures = self
                        .with_aggregator(|agg| {
                            agg.failure(&e);
                            agg.set_status_failed();
                            agg.failure_count()
                        })
                        .unwrap_or(attempt);

                    if !e.continuable {
                        error!("[!] Fatal connection failure: {}", e);
                        return Err(self.reject(transport.as_mut(), e));
                    }
                    if failures >= self.settings.max_failures {
                        error!("[!] Giving up after {} connection failures: {}", failures, e);
                        return Err(self.reject(transport.as_mut(), e));
                    }

                    warn!("Connection failed ({}), retrying", e);
                    transport.disconnect();
                    transport = (self.factory)();
                }
            }
        }

        {
            let mut state = self.state();
            if state.phase == Phase::Connecting {
                state.phase = Phase::Testing;
            }
        }
        self.run_tests(transport.as_mut(), &clock, &mut preempt).await;

        Ok(self.finalize(transport.as_mut(), &clock).await)
    }

    async fn run_tests(
        &self,
        transport: &mut dyn Transport,
        clock: &Clock,
        preempt: &mut watch::Receiver<u64>,
    ) {
        let mut rtt: Option<f64> = None;
        let mut loss = -1.0;

        for name in TEST_SEQUENCE {
            if self.phase() != Phase::Testing {
                debug!("Skipping {} test, session is finalizing", name);
                break;
            }

            let mut test = match name {
                TestName::Rtt => MeasurementTest::rtt(),
                TestName::Loss => MeasurementTest::loss(),
                TestName::Throughput => MeasurementTest::throughput(rtt, loss),
            };
            info!("Running {} test", name);
            let outcome = run_test(transport, clock, &mut test, preempt).await;
            let results = test.results();

            match &outcome.result {
                Ok(()) => {
                    match &results {
                        TestResult::Rtt(r) => rtt = Some(r.median),
                        TestResult::Loss(r) => loss = r.fraction_lost_bytes,
                        TestResult::Throughput(_) => {}
                    }
                    info!("{} test done: {}", name, summary_line(&results));
                }
                Err(e) => warn!("{} test failed: {}", name, e),
            }

            self.with_aggregator(|agg| {
                if let Err(e) = &outcome.result {
                    agg.failure(format!("{} test: {}", name, e));
                }
                agg.add(name.as_str(), results);
            });

            if outcome.preempted {
                break;
            }
        }
    }

    async fn finalize(&self, transport: &mut dyn Transport, clock: &Clock) -> PublicResult {
        self.state().phase = Phase::Finalizing;

        let diagnostics = transport.path_diagnostics().await;
        transport.disconnect();

        let report = {
            let mut state = self.state();
            let report = state.aggregator.take().map(|mut agg| {
                match diagnostics {
                    Ok(diag) => agg.add("ice", diag),
                    Err(e) => agg.failure(e),
                }
                agg.get_results()
            });
            state.phase = Phase::Done;
            state.last_report = report.clone();
            report
        };

        let public = PublicResult::from_report(report.as_ref(), clock.now_ms());
        if let Some(report) = &report {
            info!(
                "Session {} finished with status {:?}",
                report.id, report.status
            );
        }
        public
    }

    fn reject(&self, transport: &mut dyn Transport, err: ConnectError) -> ControllerError {
        transport.disconnect();
        let mut state = self.state();
        state.last_report = state.aggregator.take().map(|agg| agg.get_results());
        state.phase = Phase::Done;
        ControllerError::Connection(err)
    }

    fn with_aggregator<T>(&self, f: impl FnOnce(&mut ResultsAggregator) -> T) -> Option<T> {
        self.state().aggregator.as_mut().map(f)
    }

    /// A real-time call started: preempt the running session, if any.
    pub fn call_starts(&self) {
        {
            let mut state = self.state();
            state.calls_in_progress += 1;
            if let Some(agg) = state.aggregator.as_mut() {
                agg.set_status_stopped();
            }
            if matches!(state.phase, Phase::Connecting | Phase::Testing) {
                info!("Call started, stopping the diagnostic session");
                state.phase = Phase::Finalizing;
            }
        }
        self.preempt.send_modify(|generation| *generation += 1);
    }

    /// A real-time call ended. Never restarts a session on its own.
    pub fn call_finished(&self) {
        let mut state = self.state();
        state.calls_in_progress = state.calls_in_progress.saturating_sub(1);
    }
}

fn summary_line(results: &TestResult) -> String {
    match results {
        TestResult::Rtt(r) => format!(
            "median {:.1} ms, jitter {:.1} ms, {}/{} unacked",
            r.median, r.variance, r.un_acked_messages, r.sent_messages
        ),
        TestResult::Loss(r) => format!(
            "{} of {} bytes received, fraction lost {:.3}",
            r.bytes_received, r.bytes_sent, r.fraction_lost_bytes
        ),
        TestResult::Throughput(r) => format!(
            "{:.1} kbps over {} ms, {} bytes received",
            r.average, r.max_duration, r.bytes_received
        ),
    }
}
