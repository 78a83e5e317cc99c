pub(crate) mod supervisor;
pub(crate) mod transport;

use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};

use serde::{Deserialize, Serialize};

use crate::protocol::{Frame, OutboundMessage};

pub use supervisor::{ConnectionSupervisor, RECONNECT_INTERVAL_MS, SendPolicy, SupervisorConfig};
pub use transport::{MockTransport, Transport, WsTransport, backend_url};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Error,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => f.write_str("connected"),
            Self::Disconnected => f.write_str("disconnected"),
            Self::Error => f.write_str("error"),
        }
    }
}

/// What a transport reports back to its owner.
#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    ConnectError(String),
    Frame(Frame),
}

/// Anything outbound messages can be handed to.
pub trait MessageSink {
    fn send(&mut self, message: OutboundMessage);
}

impl MessageSink for Vec<OutboundMessage> {
    fn send(&mut self, message: OutboundMessage) {
        self.push(message);
    }
}

/// Fans status transitions out to every live subscriber.
///
/// Subscribers only see transitions published after they subscribed, and a status equal
/// to the previously published one is not published again.
#[derive(Debug)]
pub struct StatusBroadcaster {
    last: ConnectionStatus,
    subscribers: Vec<Sender<ConnectionStatus>>,
}

impl StatusBroadcaster {
    pub fn new(initial: ConnectionStatus) -> Self {
        Self {
            last: initial,
            subscribers: Vec::new(),
        }
    }

    pub fn subscribe(&mut self) -> Receiver<ConnectionStatus> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Publishes `status` if it differs from the last one. Returns whether it did.
    pub fn publish(&mut self, status: ConnectionStatus) -> bool {
        if status == self.last {
            return false;
        }
        self.last = status;
        // receivers that went away are dropped here
        self.subscribers.retain(|tx| tx.send(status).is_ok());
        true
    }
}
