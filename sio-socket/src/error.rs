//! Socket error definitions.
//!
//! `SocketError` is what the public API returns synchronously. `DecodeError`
//! describes a single malformed frame, which is dropped without tearing the
//! connection down. `AckError` is only ever delivered to the continuation
//! that registered the acknowledgement.

use thiserror::Error;

/// Convenience type alias for Results using SocketError.
pub type SocketResult<T> = Result<T, SocketError>;

#[derive(Error, Debug)]
pub enum SocketError {
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("handshake error: {0}")]
    Handshake(String),

    #[error("not connected")]
    NotConnected,

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("invalid namespace: {0}")]
    InvalidNamespace(String),

    #[error("event already acknowledged")]
    AlreadyAcknowledged,

    #[error("the server did not ask for an acknowledgement")]
    AckNotRequested,

    #[error("runtime error: {0}")]
    Runtime(String),
}

/// Why a transport frame could not be decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("empty frame")]
    Empty,

    #[error("unknown engine.io packet type {0:?}")]
    UnknownEngineType(char),

    #[error("unknown socket.io packet type {0:?}")]
    UnknownPacketType(char),

    #[error("message frame has no socket.io packet type")]
    MissingPacketType,

    #[error("malformed attachment count")]
    MalformedAttachmentCount,

    #[error("namespace is not terminated by ','")]
    UnterminatedNamespace,

    #[error("invalid ack id: {0}")]
    InvalidAckId(String),

    #[error("unexpected character {0:?} before payload")]
    UnexpectedCharacter(char),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("binary frame without a pending binary packet")]
    UnexpectedAttachment,

    #[error("invalid handshake: {0}")]
    InvalidHandshake(String),
}

/// Failure delivered to an acknowledgement continuation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AckError {
    #[error("ack timed out")]
    Timeout,

    #[error("connection reset before the ack arrived")]
    ConnectionReset,

    #[error("cancelled by disconnect")]
    Cancelled,

    #[error("not connected")]
    NotConnected,

    #[error("dropped from a full pending queue")]
    Dropped,

    #[error("namespace join rejected by the server")]
    JoinRejected,
}

impl From<SocketError> for sio_core::SioError {
    fn from(e: SocketError) -> Self {
        match e {
            SocketError::NotConnected => sio_core::SioError::NotConnected,
            other => sio_core::SioError::Socket(other.to_string()),
        }
    }
}
