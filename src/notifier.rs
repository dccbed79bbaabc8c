//! Event delivery to connected clients
//!
//! The engine addresses clients only by `ConnectionId`. How the event
//! reaches the socket is the transport's business.

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

use crate::error::SendError;
use crate::message::ServerMessage;
use crate::types::ConnectionId;

/// Fire-and-forget event sink
pub trait Notifier: Send + Sync {
    /// Deliver `message` to `connection`; never blocks
    fn send(&self, connection: ConnectionId, message: ServerMessage);
}

/// Notifier backed by per-connection mpsc channels
///
/// The transport registers a sender when a connection opens and
/// unregisters it when the connection closes.
#[derive(Debug, Default)]
pub struct ChannelNotifier {
    senders: DashMap<ConnectionId, mpsc::Sender<ServerMessage>>,
}

impl ChannelNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route events for `connection` into `sender`
    pub fn register(&self, connection: ConnectionId, sender: mpsc::Sender<ServerMessage>) {
        self.senders.insert(connection, sender);
    }

    pub fn unregister(&self, connection: &ConnectionId) {
        self.senders.remove(connection);
    }

    #[cfg(test)]
    pub(crate) fn connection_count(&self) -> usize {
        self.senders.len()
    }

    /// Try to deliver, reporting why delivery failed
    pub fn deliver(
        &self,
        connection: &ConnectionId,
        message: ServerMessage,
    ) -> Result<(), SendError> {
        let sender = self
            .senders
            .get(connection)
            .map(|entry| entry.value().clone())
            .ok_or(SendError::NotRegistered)?;

        sender.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => SendError::ChannelFull,
            TrySendError::Closed(_) => SendError::ChannelClosed,
        })
    }
}

impl Notifier for ChannelNotifier {
    fn send(&self, connection: ConnectionId, message: ServerMessage) {
        let event = message.event_name();
        if let Err(e) = self.deliver(&connection, message) {
            debug!("Dropped '{}' event for {}: {}", event, connection, e);
        }
    }
}
