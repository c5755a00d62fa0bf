use log::warn;
use tokio::time::Instant;

use crate::configuration::ConnectSettings;
use crate::error_handling::types::{ConnectError, ConnectFailure};

/// The two deadlines that bound channel establishment.
///
/// The overall deadline is armed when the watchdog is created. The negotiation deadline is
/// armed the first time negotiation is reported as in progress and is only cleared by a
/// confirmed state change. Both expiries are continuable: a fresh attempt may well succeed.
///
/// Transports select on [`ConnectWatchdog::next_expiry`] alongside their own I/O and drop
/// the watchdog once the channel is open.
#[derive(Debug, Clone)]
pub struct ConnectWatchdog {
    connection_deadline: Instant,
    negotiation_timeout: std::time::Duration,
    negotiation_deadline: Option<Instant>,
}

impl ConnectWatchdog {
    pub fn start(settings: &ConnectSettings) -> Self {
        Self {
            connection_deadline: Instant::now() + settings.connection_timeout(),
            negotiation_timeout: settings.negotiation_timeout(),
            negotiation_deadline: None,
        }
    }

    /// Arms the negotiation deadline unless it is already running.
    pub fn negotiating(&mut self) {
        if self.negotiation_deadline.is_none() {
            self.negotiation_deadline = Some(Instant::now() + self.negotiation_timeout);
        }
    }

    /// Negotiation reached a connected state.
    pub fn confirmed(&mut self) {
        self.negotiation_deadline = None;
    }

    /// The earliest pending deadline and the error it produces.
    pub fn next_expiry(&self) -> (Instant, ConnectFailure) {
        match self.negotiation_deadline {
            Some(deadline) if deadline < self.connection_deadline => {
                (deadline, ConnectFailure::NegotiationTimeout)
            }
            _ => (self.connection_deadline, ConnectFailure::ConnectionTimeout),
        }
    }

    /// Sleeps until the earliest deadline and returns its error.
    pub async fn expired(&self) -> ConnectError {
        let (deadline, failure) = self.next_expiry();
        tokio::time::sleep_until(deadline).await;
        warn!("Connect watchdog expired: {}", failure);
        ConnectError::continuable(failure)
    }
}
