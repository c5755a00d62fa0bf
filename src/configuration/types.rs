use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error_handling::types::ConfigError;

const SERVER_URL_PATTERN: &str =
    r"^(stun|stuns|turn|turns):(\[[0-9A-Fa-f:.]+\]|[^:?\[\]\s]+)(?::(\d{1,5}))?(?:\?transport=(udp|tcp))?$";

/// One relay/helper server entry, in the usual `{urls, username, credential}` shape.
///
/// `urls` accepts either a single string or a list of strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceServer {
    #[serde(deserialize_with = "one_or_many")]
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }

    /// Copy of this entry that is safe to put in a report
    pub fn without_credential(&self) -> Self {
        Self {
            urls: self.urls.clone(),
            username: self.username.clone(),
            credential: None,
        }
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(url) => vec![url],
        OneOrMany::Many(urls) => urls,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerScheme {
    Stun,
    Stuns,
    Turn,
    Turns,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlTransport {
    Udp,
    Tcp,
}

/// A parsed `scheme:host[:port][?transport=..]` server URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerUrl {
    pub scheme: ServerScheme,
    pub host: String,
    pub port: u16,
    pub transport: UrlTransport,
}

impl ServerUrl {
    pub fn parse(url: &str) -> Result<Self, ConfigError> {
        let pattern = Regex::new(SERVER_URL_PATTERN)
            .map_err(|e| ConfigError::BadServerUrl(format!("invalid pattern: {}", e)))?;
        let caps = pattern
            .captures(url.trim())
            .ok_or_else(|| ConfigError::BadServerUrl(url.to_string()))?;

        let scheme = match &caps[1] {
            "stun" => ServerScheme::Stun,
            "stuns" => ServerScheme::Stuns,
            "turn" => ServerScheme::Turn,
            _ => ServerScheme::Turns,
        };
        let secure = matches!(scheme, ServerScheme::Stuns | ServerScheme::Turns);

        let host = caps[2].trim_start_matches('[').trim_end_matches(']').to_string();
        let port = match caps.get(3) {
            Some(p) => p
                .as_str()
                .parse::<u16>()
                .map_err(|_| ConfigError::BadServerUrl(format!("port out of range in {}", url)))?,
            None if secure => 5349,
            None => 3478,
        };
        let transport = match caps.get(4).map(|t| t.as_str()) {
            Some("tcp") => UrlTransport::Tcp,
            Some(_) => UrlTransport::Udp,
            None if secure => UrlTransport::Tcp,
            None => UrlTransport::Udp,
        };

        Ok(Self {
            scheme,
            host,
            port,
            transport,
        })
    }

    pub fn is_relay(&self) -> bool {
        matches!(self.scheme, ServerScheme::Turn | ServerScheme::Turns)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Udp,
    Loopback,
}

impl Default for TransportKind {
    fn default() -> Self {
        TransportKind::Udp
    }
}

/// Connection establishment policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectSettings {
    /// Number of recorded continuable failures after which the session gives up
    pub max_failures: usize,
    pub connection_timeout_ms: u64,
    pub negotiation_timeout_ms: u64,
}

impl Default for ConnectSettings {
    fn default() -> Self {
        Self {
            max_failures: 10,
            connection_timeout_ms: 30_000,
            negotiation_timeout_ms: 10_000,
        }
    }
}

impl ConnectSettings {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn negotiation_timeout(&self) -> Duration {
        Duration::from_millis(self.negotiation_timeout_ms)
    }
}
