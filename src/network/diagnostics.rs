//! Path diagnostics: what was gathered, what succeeded, and which local addresses were seen.

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use super::candidate::{Candidate, RelayTransport};
use super::stats_adapter::{CandidateStats, IceCandidateReport};
use crate::configuration::IceServer;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalIpInfo {
    pub ip: String,
    pub candidate_type: String,
    pub network_type: String,
}

/// The diagnostic entry stored under `ice` in a session report.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathDiagnostics {
    pub turn_ip_address: String,
    pub turn_ip_version: String,
    pub turn_transport: String,
    pub turn_network_type: String,
    pub ice_servers: Vec<IceServer>,
    pub ipv6_supported: bool,
    pub ipv4_supported: bool,
    pub relay_tls_gathered: bool,
    pub relay_tcp_gathered: bool,
    pub relay_udp_gathered: bool,
    pub srflx_gathered: bool,
    pub relay_tls_success: bool,
    pub relay_tcp_success: bool,
    pub relay_udp_success: bool,
    pub srflx_success: bool,
    pub local_ip_address_info: Vec<LocalIpInfo>,
    #[serde(rename = "localIP")]
    pub local_ip: String,
    #[serde(rename = "numberOfLocalIPs")]
    pub number_of_local_ips: usize,
    #[serde(rename = "localIPType")]
    pub local_ip_type: String,
    #[serde(rename = "localIPNetworkType")]
    pub local_ip_network_type: String,
}

impl PathDiagnostics {
    /// True when a relay path of any transport carried traffic.
    pub fn any_relay_success(&self) -> bool {
        self.relay_udp_success || self.relay_tcp_success || self.relay_tls_success
    }

    fn mark_gathered(&mut self, transport: &str) {
        match transport {
            "udp" => self.relay_udp_gathered = true,
            "tcp" => self.relay_tcp_gathered = true,
            "tls" => self.relay_tls_gathered = true,
            _ => {}
        }
    }

    fn mark_success(&mut self, transport: &str) {
        match transport {
            "udp" => self.relay_udp_success = true,
            "tcp" => self.relay_tcp_success = true,
            "tls" => self.relay_tls_success = true,
            _ => {}
        }
    }

    fn mark_candidate_success(&mut self, cand: &CandidateStats) {
        if cand.is_relay() {
            if let Some(transport) = cand.relay_transport.as_deref() {
                self.mark_success(transport);
            }
        }
        if cand.is_server_reflexive() {
            self.srflx_success = true;
        }
    }
}

/// Accumulates candidate observations during connection setup and turns a statistics
/// snapshot into [`PathDiagnostics`].
#[derive(Debug, Default)]
pub struct DiagnosticsCollector {
    ice_servers: Vec<IceServer>,
    observed: PathDiagnostics,
    local_ips: Vec<LocalIpInfo>,
    local_ip: Option<(String, String)>,
    public_ip_count: usize,
}

impl DiagnosticsCollector {
    pub fn new(ice_servers: &[IceServer]) -> Self {
        Self {
            ice_servers: ice_servers
                .iter()
                .map(IceServer::without_credential)
                .collect(),
            ..Default::default()
        }
    }

    /// Records a candidate descriptor seen during gathering.
    pub fn observe_descriptor(&mut self, descriptor: &str) {
        match Candidate::parse(descriptor) {
            Some(candidate) => self.observe(&candidate),
            None => warn!("Unparsable candidate descriptor: {:?}", descriptor),
        }
    }

    pub fn observe(&mut self, candidate: &Candidate) {
        if candidate.is_relay() {
            match candidate.transport_type {
                RelayTransport::None => {}
                transport => self.observed.mark_gathered(transport.stats_label()),
            }
            return;
        }
        if candidate.is_server_reflexive() {
            self.observed.srflx_gathered = true;
        }

        let ip = &candidate.ip_address;
        if !self.local_ips.iter().any(|info| &info.ip == ip) {
            debug!(
                "Local address {} ({})",
                ip,
                candidate.candidate_type.as_str()
            );
            self.local_ips.push(LocalIpInfo {
                ip: ip.clone(),
                candidate_type: candidate.candidate_type.as_str().to_string(),
                network_type: "unknown".to_string(),
            });
            if candidate.is_public_ip() {
                self.public_ip_count += 1;
            }
        }
        if candidate.is_public_ip() && self.local_ip.is_none() {
            self.local_ip = Some((
                ip.clone(),
                candidate.candidate_type.as_str().to_string(),
            ));
        }
    }

    /// Combines the observations with a statistics snapshot.
    pub fn build(&self, report: &IceCandidateReport) -> PathDiagnostics {
        let mut diag = self.observed.clone();
        diag.ice_servers = self.ice_servers.clone();
        diag.number_of_local_ips = self.public_ip_count;
        if let Some((ip, kind)) = &self.local_ip {
            diag.local_ip = ip.clone();
            diag.local_ip_type = kind.clone();
        }

        diag.local_ip_address_info = self
            .local_ips
            .iter()
            .map(|info| {
                let mut info = info.clone();
                let network_type = report
                    .local_candidates
                    .iter()
                    .filter(|cand| cand.ip.as_deref() == Some(info.ip.as_str()))
                    .filter_map(|cand| cand.network_type.as_deref())
                    .filter(|network| *network != "unknown")
                    .last();
                if let Some(network_type) = network_type {
                    info.network_type = network_type.to_string();
                }
                info
            })
            .collect();

        let mut found_active = false;
        for pair in report.candidate_pairs.iter().filter(|pair| pair.is_active()) {
            let Some(cand) = pair
                .local_candidate_id
                .as_deref()
                .and_then(|id| report.local_candidate(id))
            else {
                continue;
            };
            found_active = true;

            let ip = cand.ip.clone().unwrap_or_default();
            let network_type = cand.network_type.clone().unwrap_or_default();
            diag.turn_ip_version = if ip.contains(':') { "ipv6" } else { "ipv4" }.to_string();
            diag.turn_ip_address = ip.clone();
            diag.turn_network_type = network_type.clone();
            diag.local_ip_network_type = network_type;
            diag.turn_transport = cand.relay_transport.clone().unwrap_or_default();

            // the active pair is not always reported as succeeded
            diag.mark_candidate_success(cand);

            if !ip.is_empty() {
                if ip.contains(':') {
                    diag.ipv6_supported = true;
                } else {
                    diag.ipv4_supported = true;
                }
            }
        }
        if !found_active {
            debug!("No active candidate pair in statistics");
        }

        for cand in &report.local_candidates {
            if cand.is_relay() {
                if let Some(transport) = cand.relay_transport.as_deref() {
                    diag.mark_gathered(transport);
                }
            }
            if cand.is_server_reflexive() {
                diag.srflx_gathered = true;
            }
        }

        for pair in report.candidate_pairs.iter().filter(|pair| pair.succeeded()) {
            if let Some(cand) = pair
                .local_candidate_id
                .as_deref()
                .and_then(|id| report.local_candidate(id))
            {
                diag.mark_candidate_success(cand);
            }
        }

        diag
    }
}
