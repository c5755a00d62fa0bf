//! Channel side of a diagnostic session: the [`transport::Transport`] seam, its two
//! implementations, connect watchdogs, and the candidate/statistics parsing that feeds
//! path diagnostics.

pub mod candidate;
pub mod diagnostics;
pub mod echo_server;
pub mod loopback;
pub mod stats_adapter;
pub mod transport;
pub mod udp_relay;
pub mod watchdog;

pub use diagnostics::PathDiagnostics;
pub use transport::{ChannelEvent, ConsumerId, Transport};
