//! In-process transport that echoes every message back immediately.
//!
//! Useful for checking the measurement pipeline without a network: RTT is ~0, nothing is
//! lost unless a drop rate is configured, and the reported path looks like a working UDP
//! relay.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info};
use serde_json::json;
use tokio::sync::mpsc::UnboundedSender;

use super::diagnostics::{DiagnosticsCollector, PathDiagnostics};
use super::stats_adapter::{ice_candidate_report, RawStats};
use super::transport::{ChannelEvent, ConsumerId, ConsumerSlot, Transport};
use crate::configuration::IceServer;
use crate::error_handling::types::{ConnectError, TransportError};

const LOOPBACK_HOST: &str = "candidate:1 1 udp 2113937151 127.0.0.1 40000 typ host generation 0";
const LOOPBACK_RELAY: &str =
    "candidate:2 1 udp 33562367 127.0.0.1 40001 typ relay raddr 127.0.0.1 rport 40000";

/// Shared view of what a [`LoopbackTransport`] did, readable after it was handed away.
#[derive(Debug, Clone, Default)]
pub struct LoopbackCounters {
    sent: Arc<AtomicUsize>,
    connects: Arc<AtomicUsize>,
    disconnects: Arc<AtomicUsize>,
}

impl LoopbackCounters {
    pub fn sent(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

pub struct LoopbackTransport {
    slot: ConsumerSlot,
    open: bool,
    connect_error: Option<ConnectError>,
    drop_every: Option<usize>,
    low_buffer_supported: bool,
    counters: LoopbackCounters,
    collector: Option<DiagnosticsCollector>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self {
            slot: ConsumerSlot::new(),
            open: false,
            connect_error: None,
            drop_every: None,
            low_buffer_supported: true,
            counters: LoopbackCounters::default(),
            collector: None,
        }
    }

    /// Every `connect` fails with `err`.
    pub fn with_connect_error(mut self, err: ConnectError) -> Self {
        self.connect_error = Some(err);
        self
    }

    /// Swallows every `n`th message instead of echoing it.
    pub fn with_drop_every(mut self, n: usize) -> Self {
        self.drop_every = (n > 0).then_some(n);
        self
    }

    pub fn with_low_buffer_support(mut self, supported: bool) -> Self {
        self.low_buffer_supported = supported;
        self
    }

    /// Reuses existing counters, so several transports built by one factory add up.
    pub fn with_counters(mut self, counters: LoopbackCounters) -> Self {
        self.counters = counters;
        self
    }

    pub fn counters(&self) -> LoopbackCounters {
        self.counters.clone()
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn connect(&mut self, servers: &[IceServer]) -> Result<(), ConnectError> {
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.connect_error {
            debug!("Loopback connect scripted to fail: {}", err);
            return Err(err.clone());
        }

        let mut collector = DiagnosticsCollector::new(servers);
        collector.observe_descriptor(LOOPBACK_HOST);
        collector.observe_descriptor(LOOPBACK_RELAY);
        self.collector = Some(collector);
        self.open = true;
        info!("Loopback channel open");
        Ok(())
    }

    fn send(&mut self, payload: String) {
        if !self.open {
            self.slot
                .deliver(ChannelEvent::Error(TransportError::ChannelNotOpen));
            return;
        }

        let sent = self.counters.sent.fetch_add(1, Ordering::SeqCst) + 1;
        if matches!(self.drop_every, Some(n) if sent % n == 0) {
            return;
        }
        self.slot.deliver(ChannelEvent::Message(payload));
    }

    fn disconnect(&mut self) {
        if self.open {
            debug!("Loopback channel closed");
        }
        self.open = false;
        self.counters.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    async fn path_diagnostics(&mut self) -> Result<PathDiagnostics, TransportError> {
        let collector = self.collector.as_ref().ok_or_else(|| {
            TransportError::StatsUnavailable("channel was never opened".to_string())
        })?;

        let stats = [
            json!({"id": "L-relay", "type": "local-candidate", "ip": "127.0.0.1", "port": 40001,
                   "candidateType": "relay", "relayProtocol": "udp", "networkType": "loopback"}),
            json!({"id": "L-host", "type": "local-candidate", "ip": "127.0.0.1", "port": 40000,
                   "candidateType": "host", "networkType": "loopback"}),
            json!({"id": "R-relay", "type": "remote-candidate", "ip": "127.0.0.1", "port": 40001,
                   "candidateType": "relay"}),
            json!({"id": "P-relay", "type": "candidate-pair", "localCandidateId": "L-relay",
                   "remoteCandidateId": "R-relay", "state": "succeeded"}),
            json!({"id": "T", "type": "transport", "selectedCandidatePairId": "P-relay"}),
        ]
        .into_iter()
        .filter_map(|record| match record {
            serde_json::Value::Object(map) => Some(map),
            _ => None,
        })
        .collect();

        Ok(collector.build(&ice_candidate_report(RawStats::Records(stats))))
    }

    fn install_consumer(
        &mut self,
        tx: UnboundedSender<ChannelEvent>,
    ) -> Result<ConsumerId, TransportError> {
        self.slot.install(tx)
    }

    fn revoke_consumer(&mut self, id: ConsumerId) -> bool {
        self.slot.revoke(id)
    }

    fn buffered_amount(&self) -> usize {
        0
    }

    fn set_low_buffer_threshold(&mut self, _threshold: usize) -> bool {
        self.low_buffer_supported
    }
}
