use crate::types::{ClientMessage, ConnectionId};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Push contract the refresh engine talks through. Fire and forget: delivery
/// to a connection that has since gone away is silently dropped.
pub trait ClientNotifier: Send + Sync {
    fn send(&self, conn: &ConnectionId, message: ClientMessage);
    fn broadcast(&self, message: ClientMessage);
}

/// One outbound message, addressed to a single connection or to everyone.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub to: Option<ConnectionId>,
    pub message: ClientMessage,
}

/// Broadcast-channel notifier. The transport layer subscribes once per live
/// connection and forwards envelopes addressed to it (or to everyone).
pub struct ClientBus {
    tx: broadcast::Sender<Envelope>,
}

impl ClientBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }
}

impl ClientNotifier for ClientBus {
    fn send(&self, conn: &ConnectionId, message: ClientMessage) {
        let _ = self.tx.send(Envelope {
            to: Some(conn.clone()),
            message,
        });
    }

    fn broadcast(&self, message: ClientMessage) {
        let _ = self.tx.send(Envelope { to: None, message });
    }
}

pub type SharedClientBus = Arc<ClientBus>;
