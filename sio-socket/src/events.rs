//! Connection state, lifecycle events and the hand-off types between the
//! I/O task and the callback context.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::ack::SettledAck;
use crate::codec::Packet;

/// Connection state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not connected and not trying to connect.
    Disconnected,
    /// Transport opening, waiting for the handshake.
    Connecting,
    /// Handshake complete, session id assigned.
    Connected,
    /// Connection lost, waiting out the backoff before the next attempt.
    Reconnecting,
    /// Local disconnect in progress.
    Closing,
}

impl ConnectionState {
    /// Whether new emits are rejected outright.
    pub fn rejects_emits(self) -> bool {
        matches!(self, Self::Disconnected | Self::Closing)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Closing => write!(f, "closing"),
        }
    }
}

/// Why a session ended up disconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// The server disconnected the default namespace or rejected it.
    IoServerDisconnect,
    /// `disconnect()` was called locally.
    IoClientDisconnect,
    /// The transport was closed by the peer or the network.
    TransportClose,
    /// The transport could not be opened or the handshake failed.
    TransportError,
    /// No server activity within ping interval + ping timeout.
    PingTimeout,
}

impl DisconnectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::IoServerDisconnect => "io_server_disconnect",
            Self::IoClientDisconnect => "io_client_disconnect",
            Self::TransportClose => "transport_close",
            Self::TransportError => "transport_error",
            Self::PingTimeout => "ping_timeout",
        }
    }

    /// Whether the loss is worth a reconnection attempt.
    pub fn is_recoverable(self) -> bool {
        matches!(
            self,
            Self::TransportClose | Self::TransportError | Self::PingTimeout
        )
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle notifications delivered on the callback context.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// A namespace finished joining (`/` on every successful handshake).
    Connect { namespace: String },
    /// The transport was lost; attempt `attempt` starts after `delay`.
    Reconnecting { attempt: u32, delay: Duration },
    /// The session is disconnected and will not retry.
    Disconnect { reason: DisconnectReason },
    /// The server refused a namespace join.
    ConnectError {
        namespace: String,
        data: serde_json::Value,
    },
    /// The server left a named namespace on its side.
    NamespaceDisconnect { namespace: String },
    /// A full join queue dropped its oldest emit.
    Backpressure { namespace: String, dropped: usize },
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::Reconnecting { .. } => "reconnecting",
            Self::Disconnect { .. } => "disconnect",
            Self::ConnectError { .. } => "connect_error",
            Self::NamespaceDisconnect { .. } => "namespace_disconnect",
            Self::Backpressure { .. } => "backpressure",
        }
    }
}

/// Broadcast-based dispatcher for async consumers of lifecycle events.
///
/// Slow receivers see `RecvError::Lagged` instead of blocking the callback context.
#[derive(Clone)]
pub struct EventDispatcher {
    sender: broadcast::Sender<ClientEvent>,
}

impl EventDispatcher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.sender.subscribe()
    }

    pub fn dispatch(&self, event: ClientEvent) {
        let name = event.name();
        match self.sender.send(event) {
            Ok(count) => debug!("dispatched {name} to {count} subscriber(s)"),
            Err(_) => debug!("no subscribers for event {name}"),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Work posted from the I/O task to the callback context.
#[derive(Debug)]
pub(crate) enum EngineEvent {
    Connected { sid: String },
    Reconnecting { attempt: u32, delay: Duration },
    Disconnected { reason: DisconnectReason },
    Packet(Packet),
    AckSettled(SettledAck),
}

/// Requests from the callback context to the I/O task.
#[derive(Debug)]
pub(crate) enum Command {
    /// Write a packet. `generation` pins packets that carry a tracked ack id
    /// to the ack table generation they were registered in.
    Send {
        packet: Packet,
        generation: Option<u64>,
    },
    Disconnect,
}
