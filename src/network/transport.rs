//! The channel abstraction the measurement tests run over.
//!
//! A [`Transport`] owns one logical bidirectional message channel. Inbound traffic and
//! asynchronous errors are pushed as [`ChannelEvent`]s to exactly one consumer at a time;
//! the consumer registration lives in a [`ConsumerSlot`], which refuses a second
//! installation until the current one is revoked.

use async_trait::async_trait;
use log::{debug, trace};
use tokio::sync::mpsc::UnboundedSender;

use super::diagnostics::PathDiagnostics;
use crate::configuration::IceServer;
use crate::error_handling::types::{ConnectError, TransportError};

pub type ConsumerId = u64;

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Message(String),
    Error(TransportError),
    /// The outbound buffer dropped to the configured low threshold
    BufferedAmountLow,
}

/// One logical message channel to the far end.
///
/// `send` never fails synchronously: a send on a channel that is not open, or one the
/// channel refuses, is reported to the installed consumer as [`ChannelEvent::Error`].
#[async_trait]
pub trait Transport: Send {
    /// Opens the channel. Resolves once it can carry messages.
    async fn connect(&mut self, servers: &[IceServer]) -> Result<(), ConnectError>;

    fn send(&mut self, payload: String);

    /// Releases every resource. Safe to call repeatedly and before `connect`.
    fn disconnect(&mut self);

    async fn path_diagnostics(&mut self) -> Result<PathDiagnostics, TransportError>;

    fn install_consumer(
        &mut self,
        tx: UnboundedSender<ChannelEvent>,
    ) -> Result<ConsumerId, TransportError>;

    /// Returns `false` when `id` is not the installed consumer.
    fn revoke_consumer(&mut self, id: ConsumerId) -> bool;

    /// Bytes accepted by `send` but not yet handed to the network
    fn buffered_amount(&self) -> usize;

    /// Asks for [`ChannelEvent::BufferedAmountLow`] whenever the outbound buffer drains to
    /// `threshold`. Returns `false` when the channel cannot notify, in which case the caller
    /// has to poll [`Transport::buffered_amount`].
    fn set_low_buffer_threshold(&mut self, threshold: usize) -> bool;
}

/// Single-consumer registration.
#[derive(Debug, Default)]
pub struct ConsumerSlot {
    next_id: ConsumerId,
    current: Option<(ConsumerId, UnboundedSender<ChannelEvent>)>,
}

impl ConsumerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(
        &mut self,
        tx: UnboundedSender<ChannelEvent>,
    ) -> Result<ConsumerId, TransportError> {
        if self.current.is_some() {
            return Err(TransportError::ConsumerAlreadyInstalled);
        }
        self.next_id += 1;
        self.current = Some((self.next_id, tx));
        debug!("Installed channel consumer {}", self.next_id);
        Ok(self.next_id)
    }

    pub fn revoke(&mut self, id: ConsumerId) -> bool {
        match &self.current {
            Some((current, _)) if *current == id => {
                self.current = None;
                debug!("Revoked channel consumer {}", id);
                true
            }
            _ => false,
        }
    }

    pub fn is_installed(&self) -> bool {
        self.current.is_some()
    }

    /// Hands an event to the installed consumer. Returns `false` when nobody received it.
    pub fn deliver(&self, event: ChannelEvent) -> bool {
        match &self.current {
            Some((_, tx)) => tx.send(event).is_ok(),
            None => {
                trace!("No channel consumer, dropping {:?}", event);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::unbounded_channel;

    #[test]
    fn test_install_requires_revoke_first() {
        let mut slot = ConsumerSlot::new();
        let (tx1, mut rx1) = unbounded_channel();
        let (tx2, mut rx2) = unbounded_channel();

        let first = slot.install(tx1).unwrap();
        assert_eq!(
            slot.install(tx2.clone()),
            Err(TransportError::ConsumerAlreadyInstalled)
        );

        assert!(slot.deliver(ChannelEvent::Message("a".to_string())));
        assert!(slot.revoke(first));
        assert!(!slot.revoke(first));

        let second = slot.install(tx2).unwrap();
        assert_ne!(first, second);
        assert!(slot.deliver(ChannelEvent::BufferedAmountLow));

        assert_eq!(rx1.try_recv(), Ok(ChannelEvent::Message("a".to_string())));
        assert!(rx1.try_recv().is_err());
        assert_eq!(rx2.try_recv(), Ok(ChannelEvent::BufferedAmountLow));
    }

    #[test]
    fn test_revoke_with_stale_id_keeps_consumer() {
        let mut slot = ConsumerSlot::new();
        let (tx, _rx) = unbounded_channel();
        let id = slot.install(tx).unwrap();
        assert!(!slot.revoke(id + 1));
        assert!(slot.is_installed());
    }

    #[test]
    fn test_deliver_without_consumer() {
        let slot = ConsumerSlot::new();
        assert!(!slot.deliver(ChannelEvent::Message("lost".to_string())));
    }
}
