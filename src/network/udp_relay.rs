//! UDP transport.
//!
//! Connects a UDP socket to the first server URL that allows UDP and treats the far end as
//! a reflector: negotiation succeeds once a random hello token comes back, after which every
//! inbound datagram is a channel message. Outbound payloads go through a writer task so the
//! amount of queued bytes can be observed the way a data channel's buffer would be.
//!
//! ```text
//!  send() ──▶ outbound queue ──▶ writer task ──▶ socket ──▶ relay/echo
//!                 │ buffered                                   │
//!  consumer ◀── reader task ◀────────────── socket ◀───────────┘
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::{json, Value};
use tokio::net::{lookup_host, UdpSocket};
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio::task::JoinHandle;

use super::diagnostics::{DiagnosticsCollector, PathDiagnostics};
use super::stats_adapter::{ice_candidate_report, RawStats, StatsRecord};
use super::transport::{ChannelEvent, ConsumerId, ConsumerSlot, Transport};
use super::watchdog::ConnectWatchdog;
use crate::configuration::types::{ServerUrl, UrlTransport};
use crate::configuration::{ConnectSettings, IceServer};
use crate::error_handling::types::{ConnectError, ConnectFailure, TransportError};

const MAX_DATAGRAM: usize = 65_536;
const HELLO_INTERVAL: Duration = Duration::from_millis(500);
const NO_THRESHOLD: usize = usize::MAX;

pub struct UdpRelayTransport {
    settings: ConnectSettings,
    slot: Arc<Mutex<ConsumerSlot>>,
    outbound: Option<UnboundedSender<String>>,
    buffered: Arc<AtomicUsize>,
    low_threshold: Arc<AtomicUsize>,
    tasks: Vec<JoinHandle<()>>,
    collector: Option<DiagnosticsCollector>,
    stats: Vec<StatsRecord>,
}

impl UdpRelayTransport {
    pub fn new(settings: ConnectSettings) -> Self {
        Self {
            settings,
            slot: Arc::new(Mutex::new(ConsumerSlot::new())),
            outbound: None,
            buffered: Arc::new(AtomicUsize::new(0)),
            low_threshold: Arc::new(AtomicUsize::new(NO_THRESHOLD)),
            tasks: Vec::new(),
            collector: None,
            stats: Vec::new(),
        }
    }

    fn deliver(&self, event: ChannelEvent) {
        deliver(&self.slot, event);
    }

    async fn resolve(&self, url: &ServerUrl) -> Result<SocketAddr, ConnectError> {
        let lookup = lookup_host((url.host.as_str(), url.port));
        let addrs = tokio::time::timeout(self.settings.connection_timeout(), lookup)
            .await
            .map_err(|_| ConnectError::continuable(ConnectFailure::ConnectionTimeout))?
            .map_err(|e| ConnectError::fatal(ConnectFailure::InvalidServer(e.to_string())))?;

        addrs.into_iter().next().ok_or_else(|| {
            ConnectError::fatal(ConnectFailure::InvalidServer(format!(
                "{} did not resolve",
                url.host
            )))
        })
    }

    fn record_path(&mut self, servers: &[IceServer], url: &ServerUrl, local: SocketAddr, peer: SocketAddr) {
        let mut collector = DiagnosticsCollector::new(servers);
        collector.observe_descriptor(&format!(
            "candidate:1 1 udp 2113937151 {} {} typ host generation 0",
            local.ip(),
            local.port()
        ));

        let mut stats = vec![json!({
            "id": "L-host", "type": "local-candidate", "ip": local.ip().to_string(),
            "port": local.port(), "candidateType": "host", "networkType": "unknown"
        })];
        let active = if url.is_relay() {
            collector.observe_descriptor(&format!(
                "candidate:2 1 udp 33562367 {} {} typ relay raddr {} rport {}",
                peer.ip(),
                peer.port(),
                local.ip(),
                local.port()
            ));
            stats.push(json!({
                "id": "L-relay", "type": "local-candidate", "ip": peer.ip().to_string(),
                "port": peer.port(), "candidateType": "relay", "relayProtocol": "udp"
            }));
            "L-relay"
        } else {
            "L-host"
        };
        stats.push(json!({
            "id": "R", "type": "remote-candidate", "ip": peer.ip().to_string(),
            "port": peer.port(), "candidateType": if url.is_relay() { "relay" } else { "host" }
        }));
        stats.push(json!({
            "id": "P", "type": "candidate-pair", "localCandidateId": active,
            "remoteCandidateId": "R", "state": "succeeded"
        }));
        stats.push(json!({"id": "T", "type": "transport", "selectedCandidatePairId": "P"}));

        self.collector = Some(collector);
        self.stats = stats
            .into_iter()
            .filter_map(|record| match record {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect();
    }
}

fn deliver(slot: &Mutex<ConsumerSlot>, event: ChannelEvent) {
    match slot.lock() {
        Ok(slot) => {
            slot.deliver(event);
        }
        Err(_) => warn!("Consumer slot poisoned, dropping {:?}", event),
    }
}

/// First URL of any server entry that can be reached over UDP.
fn pick_server(servers: &[IceServer]) -> Result<ServerUrl, ConnectError> {
    servers
        .iter()
        .flat_map(|server| server.urls.iter())
        .filter_map(|url| ServerUrl::parse(url).ok())
        .find(|url| url.transport == UrlTransport::Udp)
        .ok_or_else(|| {
            ConnectError::fatal(ConnectFailure::InvalidServer(
                "no server reachable over udp".to_string(),
            ))
        })
}

fn hello_token() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect();
    format!("relay-probe-hello-{}", suffix)
}

async fn recv_datagram(socket: &UdpSocket) -> std::io::Result<Vec<u8>> {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let n = socket.recv(&mut buf).await?;
    buf.truncate(n);
    Ok(buf)
}

async fn negotiate(
    socket: &UdpSocket,
    token: &str,
    watchdog: &mut ConnectWatchdog,
) -> Result<(), ConnectError> {
    let mut resend = tokio::time::interval(HELLO_INTERVAL);
    loop {
        let (deadline, failure) = watchdog.next_expiry();
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                warn!("Connect watchdog expired: {}", failure);
                return Err(ConnectError::continuable(failure));
            }
            _ = resend.tick() => {
                socket.send(token.as_bytes()).await.map_err(|e| {
                    ConnectError::continuable(ConnectFailure::ChannelError(e.to_string()))
                })?;
                watchdog.negotiating();
            }
            received = recv_datagram(socket) => {
                let datagram = received.map_err(|e| {
                    ConnectError::continuable(ConnectFailure::ChannelError(e.to_string()))
                })?;
                if datagram == token.as_bytes() {
                    watchdog.confirmed();
                    return Ok(());
                }
                debug!("Ignoring {} byte datagram during negotiation", datagram.len());
            }
        }
    }
}

#[async_trait]
impl Transport for UdpRelayTransport {
    async fn connect(&mut self, servers: &[IceServer]) -> Result<(), ConnectError> {
        self.disconnect();

        let url = pick_server(servers)?;
        let peer = self.resolve(&url).await?;
        let bind_addr: SocketAddr = if peer.is_ipv6() {
            SocketAddr::from(([0u16; 8], 0))
        } else {
            SocketAddr::from(([0u8; 4], 0))
        };

        let setup = |e: std::io::Error| ConnectError::fatal(ConnectFailure::Setup(e.to_string()));
        let socket = UdpSocket::bind(bind_addr).await.map_err(setup)?;
        socket.connect(peer).await.map_err(setup)?;
        let local = socket.local_addr().map_err(setup)?;
        info!("Connecting {} -> {} ({}:{})", local, peer, url.host, url.port);

        let mut watchdog = ConnectWatchdog::start(&self.settings);
        let token = hello_token();
        negotiate(&socket, &token, &mut watchdog).await?;
        info!("UDP channel open to {}", peer);

        self.record_path(servers, &url, local, peer);

        let socket = Arc::new(socket);
        let (out_tx, mut out_rx) = unbounded_channel::<String>();

        let writer_socket = Arc::clone(&socket);
        let slot = Arc::clone(&self.slot);
        let buffered = Arc::clone(&self.buffered);
        let low_threshold = Arc::clone(&self.low_threshold);
        self.tasks.push(tokio::spawn(async move {
            while let Some(payload) = out_rx.recv().await {
                let len = payload.len();
                let sent = writer_socket.send(payload.as_bytes()).await;
                let before = buffered.fetch_sub(len, Ordering::SeqCst);
                let after = before.saturating_sub(len);
                let threshold = low_threshold.load(Ordering::SeqCst);
                if threshold != NO_THRESHOLD && before > threshold && after <= threshold {
                    deliver(&slot, ChannelEvent::BufferedAmountLow);
                }
                if let Err(e) = sent {
                    deliver(&slot, ChannelEvent::Error(TransportError::SendFailed(e.to_string())));
                }
            }
        }));

        let slot = Arc::clone(&self.slot);
        self.tasks.push(tokio::spawn(async move {
            loop {
                match recv_datagram(&socket).await {
                    Ok(datagram) if datagram == token.as_bytes() => continue,
                    Ok(datagram) => {
                        let message = String::from_utf8_lossy(&datagram).into_owned();
                        deliver(&slot, ChannelEvent::Message(message));
                    }
                    Err(e) => {
                        warn!("UDP channel receive error: {}", e);
                        deliver(&slot, ChannelEvent::Error(TransportError::ChannelClosed));
                        break;
                    }
                }
            }
        }));

        self.outbound = Some(out_tx);
        Ok(())
    }

    fn send(&mut self, payload: String) {
        let Some(outbound) = &self.outbound else {
            self.deliver(ChannelEvent::Error(TransportError::ChannelNotOpen));
            return;
        };

        let len = payload.len();
        self.buffered.fetch_add(len, Ordering::SeqCst);
        if outbound.send(payload).is_err() {
            self.buffered.fetch_sub(len, Ordering::SeqCst);
            self.deliver(ChannelEvent::Error(TransportError::ChannelClosed));
        }
    }

    fn disconnect(&mut self) {
        if self.outbound.take().is_some() {
            debug!("Closing UDP channel");
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.buffered.store(0, Ordering::SeqCst);
    }

    async fn path_diagnostics(&mut self) -> Result<PathDiagnostics, TransportError> {
        let collector = self.collector.as_ref().ok_or_else(|| {
            TransportError::StatsUnavailable("channel was never opened".to_string())
        })?;
        let report = ice_candidate_report(RawStats::Records(self.stats.clone()));
        Ok(collector.build(&report))
    }

    fn install_consumer(
        &mut self,
        tx: UnboundedSender<ChannelEvent>,
    ) -> Result<ConsumerId, TransportError> {
        self.slot
            .lock()
            .map_err(|_| TransportError::SendFailed("consumer slot poisoned".to_string()))?
            .install(tx)
    }

    fn revoke_consumer(&mut self, id: ConsumerId) -> bool {
        self.slot.lock().map(|mut slot| slot.revoke(id)).unwrap_or(false)
    }

    fn buffered_amount(&self) -> usize {
        self.buffered.load(Ordering::SeqCst)
    }

    fn set_low_buffer_threshold(&mut self, threshold: usize) -> bool {
        self.low_threshold.store(threshold, Ordering::SeqCst);
        true
    }
}

impl Drop for UdpRelayTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::echo_server::EchoServer;
    use tokio_test::assert_err;

    async fn echo() -> (SocketAddr, JoinHandle<()>) {
        let server = EchoServer::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let _ = server.run().await;
        });
        (addr, handle)
    }

    #[test]
    fn test_pick_server_skips_tcp_only_urls() {
        let servers = vec![
            IceServer::new("turns:relay.example.com"),
            IceServer {
                urls: vec![
                    "turn:relay.example.com?transport=tcp".to_string(),
                    "turn:relay.example.com:3480?transport=udp".to_string(),
                ],
                username: None,
                credential: None,
            },
        ];
        assert_eq!(pick_server(&servers).unwrap().port, 3480);

        let err = pick_server(&[IceServer::new("turns:relay.example.com")]).unwrap_err();
        assert!(!err.continuable);
    }

    #[tokio::test]
    async fn test_round_trip_through_echo_server() {
        let (addr, server) = echo().await;
        let mut transport = UdpRelayTransport::new(ConnectSettings::default());
        let (tx, mut rx) = unbounded_channel();
        transport.install_consumer(tx).unwrap();

        let url = format!("turn:127.0.0.1:{}?transport=udp", addr.port());
        transport.connect(&[IceServer::new(url)]).await.unwrap();
        transport.send("ping".to_string());

        assert_eq!(rx.recv().await, Some(ChannelEvent::Message("ping".to_string())));

        let diag = transport.path_diagnostics().await.unwrap();
        assert!(diag.relay_udp_success);
        assert_eq!(diag.turn_ip_address, "127.0.0.1");
        assert_eq!(diag.turn_transport, "udp");

        transport.disconnect();
        transport.disconnect();
        transport.send("late".to_string());
        assert_eq!(
            rx.recv().await,
            Some(ChannelEvent::Error(TransportError::ChannelNotOpen))
        );
        server.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_far_end_times_out_negotiating() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let url = format!("stun:127.0.0.1:{}", silent.local_addr().unwrap().port());

        let mut transport = UdpRelayTransport::new(ConnectSettings::default());
        let err = assert_err!(transport.connect(&[IceServer::new(url)]).await);
        assert!(err.continuable);
        assert_eq!(err.failure, ConnectFailure::NegotiationTimeout);
    }

    #[tokio::test]
    async fn test_send_before_connect() {
        let mut transport = UdpRelayTransport::new(ConnectSettings::default());
        let (tx, mut rx) = unbounded_channel();
        transport.install_consumer(tx).unwrap();
        transport.send("nope".to_string());
        assert_eq!(
            rx.recv().await,
            Some(ChannelEvent::Error(TransportError::ChannelNotOpen))
        );
        assert!(transport.path_diagnostics().await.is_err());
    }
}
