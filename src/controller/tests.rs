use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;
use tokio_test::{assert_err, assert_ok};

use super::controller_handler::{ConnectivityController, Phase, TransportFactory};
use crate::configuration::config::Config;
use crate::configuration::types::IceServer;
use crate::error_handling::types::*;
use crate::network::loopback::{LoopbackCounters, LoopbackTransport};
use crate::network::{ChannelEvent, ConsumerId, PathDiagnostics, Transport};
use crate::session_management::SessionStatus;

fn servers() -> Vec<IceServer> {
    vec![IceServer::new("turn:127.0.0.1:3478?transport=udp")]
}

fn loopback_factory(counters: &LoopbackCounters) -> TransportFactory {
    let counters = counters.clone();
    Box::new(move || Box::new(LoopbackTransport::new().with_counters(counters.clone())))
}

fn failing_factory(counters: &LoopbackCounters, err: ConnectError) -> TransportFactory {
    let counters = counters.clone();
    Box::new(move || {
        Box::new(
            LoopbackTransport::new()
                .with_connect_error(err.clone())
                .with_counters(counters.clone()),
        )
    })
}

/// Never finishes connecting.
struct StallingTransport;

#[async_trait]
impl Transport for StallingTransport {
    async fn connect(&mut self, _servers: &[IceServer]) -> Result<(), ConnectError> {
        std::future::pending().await
    }

    fn send(&mut self, _payload: String) {}

    fn disconnect(&mut self) {}

    async fn path_diagnostics(&mut self) -> Result<PathDiagnostics, TransportError> {
        Err(TransportError::StatsUnavailable("never connected".to_string()))
    }

    fn install_consumer(
        &mut self,
        _tx: UnboundedSender<ChannelEvent>,
    ) -> Result<ConsumerId, TransportError> {
        Ok(1)
    }

    fn revoke_consumer(&mut self, _id: ConsumerId) -> bool {
        true
    }

    fn buffered_amount(&self) -> usize {
        0
    }

    fn set_low_buffer_threshold(&mut self, _threshold: usize) -> bool {
        false
    }
}

#[tokio::test(start_paused = true)]
async fn test_full_session_over_loopback() {
    let counters = LoopbackCounters::default();
    let controller = ConnectivityController::new(&Config::default(), loopback_factory(&counters));

    let public = assert_ok!(controller.start(&servers()).await);
    assert!(public.media_connectivity);
    assert!(public.rtt.unwrap().abs() < 1e-6);
    assert!(public.jitter.unwrap().abs() < 1e-6);
    assert!(public.throughput.unwrap() > 0.0);
    assert!(public.fractional_loss.unwrap() < 0.01);
    assert_eq!(controller.phase(), Phase::Done);

    let report = controller.last_report().unwrap();
    assert_eq!(report.status, SessionStatus::Success);
    assert!(report.failures.is_empty());
    for key in ["rtt", "loss", "throughput", "ice"] {
        assert!(report.tests.contains_key(key), "missing {}", key);
    }
    assert_eq!(report.test("rtt").unwrap().as_rtt().unwrap().sent_messages, 10);
    // the RTT estimate of ~0 shortens the throughput window to its minimum
    let tp = report.test("throughput").unwrap().as_throughput().unwrap();
    assert_eq!(tp.max_duration, 1000.0);

    let diag = report.diagnostics().unwrap();
    assert!(diag.relay_udp_success);
    assert_eq!(diag.ice_servers, servers());

    assert_eq!(counters.connects(), 1);
    assert!(counters.disconnects() >= 1);
    assert_eq!(public.start_timestamp, Some(report.start_timestamp));
}

#[tokio::test(start_paused = true)]
async fn test_continuable_failures_exhaust_retry_budget() {
    let counters = LoopbackCounters::default();
    let err = ConnectError::continuable(ConnectFailure::NegotiationTimeout);
    let controller =
        ConnectivityController::new(&Config::default(), failing_factory(&counters, err.clone()));

    let rejected = assert_err!(controller.start(&servers()).await);
    assert_eq!(rejected, ControllerError::Connection(err));
    assert_eq!(counters.connects(), 10);

    let report = controller.last_report().unwrap();
    assert_eq!(report.failures.len(), 10);
    assert_eq!(report.status, SessionStatus::Failed);
    assert!(report.tests.is_empty());
    assert_eq!(controller.phase(), Phase::Done);
}

#[tokio::test(start_paused = true)]
async fn test_retry_budget_follows_configuration() {
    let counters = LoopbackCounters::default();
    let mut config = Config::default();
    config.connect.max_failures = 3;
    let err = ConnectError::continuable(ConnectFailure::ConnectionTimeout);
    let controller = ConnectivityController::new(&config, failing_factory(&counters, err));

    assert_err!(controller.start(&servers()).await);
    assert_eq!(counters.connects(), 3);
    assert_eq!(controller.last_report().unwrap().failures.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_fatal_failure_rejects_first_attempt() {
    let counters = LoopbackCounters::default();
    let err = ConnectError::fatal(ConnectFailure::CapabilityMissing("udp".to_string()));
    let controller =
        ConnectivityController::new(&Config::default(), failing_factory(&counters, err.clone()));

    let rejected = assert_err!(controller.start(&servers()).await);
    assert_eq!(rejected, ControllerError::Connection(err));
    assert_eq!(rejected.to_string(), "Connection failed: Capability missing: udp");
    assert_eq!(counters.connects(), 1);

    let report = controller.last_report().unwrap();
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].reason, "Capability missing: udp");
    assert_eq!(report.status, SessionStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_preconditions() {
    let counters = LoopbackCounters::default();

    let disabled = Config {
        platform_disabled: true,
        ..Default::default()
    };
    let controller = ConnectivityController::new(&disabled, loopback_factory(&counters));
    assert_eq!(
        controller.start(&servers()).await,
        Err(ControllerError::DisabledPlatform)
    );

    let controller = ConnectivityController::new(&Config::default(), loopback_factory(&counters));
    assert_eq!(
        controller.start(&[]).await,
        Err(ControllerError::NoServersGiven)
    );

    controller.call_starts();
    assert_eq!(
        controller.start(&servers()).await,
        Err(ControllerError::CallInProgress)
    );
    controller.call_finished();
    assert_eq!(controller.calls_in_progress(), 0);

    // rejections touch nothing
    assert_eq!(counters.connects(), 0);
    assert_eq!(controller.phase(), Phase::Idle);
    assert!(controller.last_report().is_none());

    assert_ok!(controller.start(&servers()).await);
}

#[tokio::test(start_paused = true)]
async fn test_call_preempts_running_session() {
    let counters = LoopbackCounters::default();
    let controller = Arc::new(ConnectivityController::new(
        &Config::default(),
        loopback_factory(&counters),
    ));

    let session = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move { controller.start(&servers()).await })
    };

    // the RTT test is instantaneous over loopback, the loss test takes seconds
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(controller.phase(), Phase::Testing);
    assert_eq!(
        controller.start(&servers()).await,
        Err(ControllerError::AlreadyInProgress)
    );

    controller.call_starts();
    let public = assert_ok!(session.await.unwrap());
    assert!(public.media_connectivity);
    assert!(public.rtt.is_some());
    assert_eq!(public.throughput, None);

    let report = controller.last_report().unwrap();
    assert_eq!(report.status, SessionStatus::Stopped);
    assert!(report.test("loss").unwrap().force_stopped());
    assert!(report.test("throughput").is_none());
    assert!(report.diagnostics().is_some());

    // no automatic restart once the call is over
    controller.call_finished();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(controller.phase(), Phase::Done);
    assert_eq!(counters.connects(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_call_during_connect_finalizes() {
    let factory: TransportFactory = Box::new(|| Box::new(StallingTransport));
    let controller = Arc::new(ConnectivityController::new(&Config::default(), factory));

    let session = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move { controller.start(&servers()).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(controller.phase(), Phase::Connecting);
    controller.call_starts();

    let public = assert_ok!(session.await.unwrap());
    assert!(!public.media_connectivity);
    assert_eq!(public.rtt, None);

    let report = controller.last_report().unwrap();
    assert_eq!(report.status, SessionStatus::Stopped);
    assert!(report.tests.is_empty());
    // the diagnostics request failed and was recorded
    assert_eq!(report.failures.len(), 1);
    assert_eq!(controller.calls_in_progress(), 1);
}
