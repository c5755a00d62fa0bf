//! Candidate descriptor parsing.
//!
//! A descriptor is the space-delimited candidate line produced during gathering:
//!
//! ```text
//!          0            1  2    3           4           5   6   7     8
//! candidate:911959162   1  udp  2113937151  192.168.1.5 499 typ host  generation 0 ...
//! candidate:3941065291  1  udp  33562367    172.18.0.2  307 typ relay raddr 0.0.0.0 ...
//! ```
//!
//! Only the component id, transport, priority, address, port and type are of interest.
//! Anything malformed degrades to a neutral value instead of failing the parse.

use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Component {
    Rtp,
    Rtcp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateType {
    Host,
    Srflx,
    Prflx,
    Relay,
    Other(String),
}

impl CandidateType {
    /// Accepts the standard spellings plus the legacy `relayed` and `serverreflexive`.
    pub fn from_token(token: &str) -> Self {
        match token.to_lowercase().as_str() {
            "host" => CandidateType::Host,
            "srflx" | "serverreflexive" => CandidateType::Srflx,
            "prflx" | "peerreflexive" => CandidateType::Prflx,
            "relay" | "relayed" => CandidateType::Relay,
            other => CandidateType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            CandidateType::Host => "host",
            CandidateType::Srflx => "srflx",
            CandidateType::Prflx => "prflx",
            CandidateType::Relay => "relay",
            CandidateType::Other(name) => name,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportProtocol {
    Udp,
    Tcp,
    Unknown,
}

/// Transport between the client and the relay, encoded in the top byte of a relay
/// candidate's priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayTransport {
    #[serde(rename = "UDP")]
    Udp,
    #[serde(rename = "TCP")]
    Tcp,
    #[serde(rename = "TLS")]
    Tls,
    None,
}

impl RelayTransport {
    /// Priority bits 24..31: 0 = TLS, 1 = TCP, 2 = UDP.
    pub fn from_priority(priority: u32) -> Self {
        match priority >> 24 {
            0 => RelayTransport::Tls,
            1 => RelayTransport::Tcp,
            2 => RelayTransport::Udp,
            _ => RelayTransport::None,
        }
    }

    /// Lower-case spelling used by candidate statistics (`udp`, `tcp`, `tls`, `none`)
    pub fn stats_label(&self) -> &'static str {
        match self {
            RelayTransport::Udp => "udp",
            RelayTransport::Tcp => "tcp",
            RelayTransport::Tls => "tls",
            RelayTransport::None => "none",
        }
    }
}

impl fmt::Display for RelayTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayTransport::Udp => write!(f, "UDP"),
            RelayTransport::Tcp => write!(f, "TCP"),
            RelayTransport::Tls => write!(f, "TLS"),
            RelayTransport::None => write!(f, "None"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub ip_address: String,
    pub port: Option<u16>,
    #[serde(rename = "type")]
    pub candidate_type: CandidateType,
    pub component: Component,
    pub transport_protocol: TransportProtocol,
    pub transport_type: RelayTransport,
}

impl Candidate {
    /// Parses a candidate descriptor. Returns `None` when fewer than eight tokens are
    /// present, since the type token cannot be located then.
    pub fn parse(descriptor: &str) -> Option<Self> {
        let tokens: Vec<&str> = descriptor.split(' ').collect();
        if tokens.len() < 8 {
            debug!("Ignoring short candidate descriptor: {:?}", descriptor);
            return None;
        }

        let component = if tokens[1] == "1" {
            Component::Rtp
        } else {
            Component::Rtcp
        };

        let transport_protocol = match tokens[2].to_lowercase().as_str() {
            "udp" => TransportProtocol::Udp,
            "tcp" => TransportProtocol::Tcp,
            _ => TransportProtocol::Unknown,
        };

        // only the rtp component carries the relay transport in its priority
        let transport_type = match (component, tokens[3].parse::<u32>()) {
            (Component::Rtp, Ok(priority)) => RelayTransport::from_priority(priority),
            _ => RelayTransport::None,
        };

        Some(Self {
            ip_address: tokens[4].to_string(),
            port: tokens[5].parse().ok(),
            candidate_type: CandidateType::from_token(tokens[7]),
            component,
            transport_protocol,
            transport_type,
        })
    }

    pub fn is_host(&self) -> bool {
        self.candidate_type == CandidateType::Host
    }

    pub fn is_server_reflexive(&self) -> bool {
        self.candidate_type == CandidateType::Srflx
    }

    pub fn is_relay(&self) -> bool {
        self.candidate_type == CandidateType::Relay
    }

    /// srflx and prflx candidates expose the address seen from the public side
    pub fn is_public_ip(&self) -> bool {
        matches!(
            self.candidate_type,
            CandidateType::Srflx | CandidateType::Prflx
        )
    }

    pub fn is_ipv6(&self) -> bool {
        self.ip_address.contains(':')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOST: &str = "candidate:911959162 1 udp 2113937151 192.168.1.175 49977 typ host generation 0 ufrag WBVw network-cost 50";
    const RELAY_UDP: &str = "candidate:3941065291 1 udp 33562367 172.18.0.2 30704 typ relay raddr 0.0.0.0 rport 0 generation 0 ufrag 2R2F network-cost 50";

    #[test]
    fn test_parse_host_candidate() {
        let cand = Candidate::parse(HOST).unwrap();
        assert_eq!(cand.ip_address, "192.168.1.175");
        assert_eq!(cand.port, Some(49977));
        assert!(cand.is_host());
        assert!(!cand.is_public_ip());
        assert_eq!(cand.component, Component::Rtp);
        assert_eq!(cand.transport_protocol, TransportProtocol::Udp);
        // top byte 126 is not a relay transport code
        assert_eq!(cand.transport_type, RelayTransport::None);
    }

    #[test]
    fn test_relay_transport_from_priority_top_byte() {
        let cand = Candidate::parse(RELAY_UDP).unwrap();
        assert!(cand.is_relay());
        assert_eq!(cand.transport_type, RelayTransport::Udp);
        assert_eq!(cand.transport_type.to_string(), "UDP");

        let tcp = RELAY_UDP.replace("33562367", &((1u32 << 24) | 0x1234).to_string());
        assert_eq!(
            Candidate::parse(&tcp).unwrap().transport_type,
            RelayTransport::Tcp
        );
        let tls = RELAY_UDP.replace("33562367", "255");
        assert_eq!(
            Candidate::parse(&tls).unwrap().transport_type,
            RelayTransport::Tls
        );
    }

    #[test]
    fn test_rtcp_component_never_has_transport_type() {
        let rtcp = RELAY_UDP.replacen(" 1 udp", " 2 udp", 1);
        let cand = Candidate::parse(&rtcp).unwrap();
        assert_eq!(cand.component, Component::Rtcp);
        assert_eq!(cand.transport_type, RelayTransport::None);
        assert_eq!(cand.transport_type.to_string(), "None");
    }

    #[test]
    fn test_type_matching_is_case_insensitive() {
        let relayed = RELAY_UDP.replace("typ relay", "typ RELAYED");
        assert!(Candidate::parse(&relayed).unwrap().is_relay());

        let srflx = HOST.replace("typ host", "typ srflx");
        let cand = Candidate::parse(&srflx).unwrap();
        assert!(cand.is_server_reflexive());
        assert!(cand.is_public_ip());

        let prflx = HOST.replace("typ host", "typ Prflx");
        assert!(Candidate::parse(&prflx).unwrap().is_public_ip());
    }

    #[test]
    fn test_malformed_descriptors_degrade() {
        assert!(Candidate::parse("candidate:1 1 udp").is_none());
        assert!(Candidate::parse("").is_none());

        let garbage_priority = RELAY_UDP.replace("33562367", "not-a-number");
        let cand = Candidate::parse(&garbage_priority).unwrap();
        assert_eq!(cand.transport_type, RelayTransport::None);

        let odd_transport = HOST.replace(" udp ", " sctp ");
        assert_eq!(
            Candidate::parse(&odd_transport).unwrap().transport_protocol,
            TransportProtocol::Unknown
        );
    }

    #[test]
    fn test_ipv6_address() {
        let v6 = HOST.replace("192.168.1.175", "2001:db8::5");
        assert!(Candidate::parse(&v6).unwrap().is_ipv6());
    }
}
