use std::fmt;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    BadServerUrl(String),
    NotInRange(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::BadServerUrl(e) => write!(f, "ICE server URL error: {}", e),
            ConfigError::NotInRange(e) => write!(f, "Value out of range: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

/// Why establishing the channel failed.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectFailure {
    /// Overall connection watchdog expired
    ConnectionTimeout,
    /// Negotiation stayed in the checking state for too long
    NegotiationTimeout,
    /// Negotiation reported a definitive failure
    NegotiationFailed,
    /// The channel raised an error while opening
    ChannelError(String),
    /// A required platform capability is missing
    CapabilityMissing(String),
    /// No usable server in the given list
    InvalidServer(String),
    /// Any other setup exception
    Setup(String),
}

impl fmt::Display for ConnectFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectFailure::ConnectionTimeout => write!(f, "Connection timeout"),
            ConnectFailure::NegotiationTimeout => write!(f, "Negotiation timeout"),
            ConnectFailure::NegotiationFailed => write!(f, "Negotiation failure"),
            ConnectFailure::ChannelError(e) => write!(f, "Channel error: {}", e),
            ConnectFailure::CapabilityMissing(e) => write!(f, "Capability missing: {}", e),
            ConnectFailure::InvalidServer(e) => write!(f, "Invalid server: {}", e),
            ConnectFailure::Setup(e) => write!(f, "Setup failed: {}", e),
        }
    }
}

/// Error returned by `Transport::connect`.
///
/// `continuable` tells the controller whether a fresh attempt may succeed (timeouts and
/// negotiation trouble) or whether retrying is pointless (missing capability, bad input).
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectError {
    pub failure: ConnectFailure,
    pub continuable: bool,
}

impl ConnectError {
    pub fn continuable(failure: ConnectFailure) -> Self {
        Self {
            failure,
            continuable: true,
        }
    }

    pub fn fatal(failure: ConnectFailure) -> Self {
        Self {
            failure,
            continuable: false,
        }
    }
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.failure)
    }
}

impl std::error::Error for ConnectError {}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportError {
    ChannelNotOpen,
    ChannelClosed,
    SendFailed(String),
    ConsumerAlreadyInstalled,
    StatsUnavailable(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::ChannelNotOpen => write!(f, "No send channel"),
            TransportError::ChannelClosed => write!(f, "Channel closed"),
            TransportError::SendFailed(e) => write!(f, "Send channel error: {}", e),
            TransportError::ConsumerAlreadyInstalled => {
                write!(f, "A channel consumer is already installed")
            }
            TransportError::StatsUnavailable(e) => write!(f, "Stats unavailable: {}", e),
        }
    }
}

impl std::error::Error for TransportError {}

#[derive(Debug, Clone, PartialEq)]
pub enum ProbeError {
    Transport(TransportError),
    InvalidTransition { from: String, to: String },
    Abandoned,
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeError::Transport(e) => write!(f, "Transport error: {}", e),
            ProbeError::InvalidTransition { from, to } => {
                write!(f, "Invalid test transition: {} -> {}", from, to)
            }
            ProbeError::Abandoned => write!(f, "Test abandoned before completion"),
        }
    }
}

impl std::error::Error for ProbeError {}

impl From<TransportError> for ProbeError {
    fn from(err: TransportError) -> Self {
        ProbeError::Transport(err)
    }
}

#[derive(Debug)]
pub enum NetworkError {
    BindError(std::io::Error),
    SockError(std::io::Error),
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkError::BindError(e) => write!(f, "Network bind error: {}", e),
            NetworkError::SockError(e) => write!(f, "Socket error: {}", e),
        }
    }
}

impl std::error::Error for NetworkError {}

/// Rejection reasons of `ConnectivityController::start`.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerError {
    DisabledPlatform,
    AlreadyInProgress,
    CallInProgress,
    NoServersGiven,
    Connection(ConnectError),
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerError::DisabledPlatform => write!(f, "Not started: disabled platform"),
            ControllerError::AlreadyInProgress => write!(f, "Not started: already in progress"),
            ControllerError::CallInProgress => write!(f, "Not started: call in progress"),
            ControllerError::NoServersGiven => write!(f, "Not started: no servers given"),
            ControllerError::Connection(e) => write!(f, "Connection failed: {}", e),
        }
    }
}

impl std::error::Error for ControllerError {}

impl From<ConnectError> for ControllerError {
    fn from(err: ConnectError) -> Self {
        ControllerError::Connection(err)
    }
}
