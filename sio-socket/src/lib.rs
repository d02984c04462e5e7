//! Socket.IO client engine.
//!
//! This crate speaks Engine.IO v4 over a websocket and layers Socket.IO on
//! top of it:
//! - Packet encoding/decoding with binary attachment reassembly
//! - Namespace multiplexing with bounded join queues
//! - Acknowledgement correlation with per-ack deadlines
//! - A connection state machine with heartbeat supervision
//! - Automatic reconnection with exponential backoff and jitter
//!
//! The I/O runs on a background task; handlers run wherever the host calls
//! [`SocketClient::pump`].

pub mod ack;
pub mod client;
pub mod codec;
pub mod error;
pub mod events;
pub mod namespace;
pub mod reconnect;
pub mod session;
pub mod transport;

// Re-export key types
pub use client::{Emitter, SocketClient};
pub use codec::{Frame, Packet, PacketType, Payload};
pub use error::{AckError, DecodeError, SocketError, SocketResult};
pub use events::{ClientEvent, ConnectionState, DisconnectReason, EventDispatcher};
pub use namespace::{Event, HandlerId};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use session::{build_engine_url, ConnectOptions};
pub use transport::{Connector, Transport, TransportOptions, WsConnector};
