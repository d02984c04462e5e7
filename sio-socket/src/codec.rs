//! Engine.IO / Socket.IO wire codec.
//!
//! Text frames carry one Engine.IO type digit, and for `message` frames a
//! Socket.IO type digit, an optional `<N>-` attachment count, an optional
//! `<namespace>,` prefix, an optional decimal ack id and a JSON payload.
//! Binary packets are sent as their text header followed by exactly `N`
//! binary frames; `PacketDecoder` buffers them until every attachment is in.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use sio_core::constants::{DEFAULT_NAMESPACE, DEFAULT_PING_INTERVAL_MS, DEFAULT_PING_TIMEOUT_MS};

use crate::error::DecodeError;

/// Key marking a binary placeholder inside a payload.
pub const PLACEHOLDER_KEY: &str = "_placeholder";

/// One transport frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
}

impl Frame {
    pub fn text(s: impl Into<String>) -> Self {
        Frame::Text(s.into())
    }

    pub fn binary(data: impl Into<Bytes>) -> Self {
        Frame::Binary(data.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Frame::Text(s) => Some(s),
            Frame::Binary(_) => None,
        }
    }
}

/// Engine.IO packet types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePacketType {
    Open,
    Close,
    Ping,
    Pong,
    Message,
    Upgrade,
    Noop,
}

impl EnginePacketType {
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            '0' => Some(Self::Open),
            '1' => Some(Self::Close),
            '2' => Some(Self::Ping),
            '3' => Some(Self::Pong),
            '4' => Some(Self::Message),
            '5' => Some(Self::Upgrade),
            '6' => Some(Self::Noop),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Self::Open => '0',
            Self::Close => '1',
            Self::Ping => '2',
            Self::Pong => '3',
            Self::Message => '4',
            Self::Upgrade => '5',
            Self::Noop => '6',
        }
    }
}

/// Socket.IO packet types carried inside an Engine.IO `message`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Connect,
    Disconnect,
    Event,
    Ack,
    ConnectError,
    BinaryEvent,
    BinaryAck,
}

impl PacketType {
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            '0' => Some(Self::Connect),
            '1' => Some(Self::Disconnect),
            '2' => Some(Self::Event),
            '3' => Some(Self::Ack),
            '4' => Some(Self::ConnectError),
            '5' => Some(Self::BinaryEvent),
            '6' => Some(Self::BinaryAck),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Self::Connect => '0',
            Self::Disconnect => '1',
            Self::Event => '2',
            Self::Ack => '3',
            Self::ConnectError => '4',
            Self::BinaryEvent => '5',
            Self::BinaryAck => '6',
        }
    }

    pub fn is_binary(self) -> bool {
        matches!(self, Self::BinaryEvent | Self::BinaryAck)
    }

    pub fn is_event(self) -> bool {
        matches!(self, Self::Event | Self::BinaryEvent)
    }

    pub fn is_ack(self) -> bool {
        matches!(self, Self::Ack | Self::BinaryAck)
    }
}

/// Contents of the Engine.IO `open` packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_payload: Option<u64>,
}

fn default_ping_interval() -> u64 {
    DEFAULT_PING_INTERVAL_MS
}

fn default_ping_timeout() -> u64 {
    DEFAULT_PING_TIMEOUT_MS
}

impl Handshake {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout)
    }

    /// Longest silence tolerated from the server before the link is declared dead.
    pub fn liveness_window(&self) -> Duration {
        self.ping_interval() + self.ping_timeout()
    }
}

/// Event or ack arguments plus the binary attachments they reference.
///
/// Binary arguments are stored as `{"_placeholder":true,"num":i}` markers in
/// `args`; `attachments[i]` holds the bytes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Payload {
    pub args: Vec<Value>,
    pub attachments: Vec<Bytes>,
}

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a JSON argument.
    pub fn with_arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Append a binary argument.
    pub fn with_binary(mut self, data: impl Into<Bytes>) -> Self {
        self.args.push(Self::placeholder(self.attachments.len()));
        self.attachments.push(data.into());
        self
    }

    /// The marker value standing in for attachment `num`.
    pub fn placeholder(num: usize) -> Value {
        json!({ "_placeholder": true, "num": num })
    }

    /// Attachment index referenced by a placeholder marker.
    pub fn placeholder_index(value: &Value) -> Option<usize> {
        let obj = value.as_object()?;
        if obj.get(PLACEHOLDER_KEY).and_then(Value::as_bool) != Some(true) {
            return None;
        }
        obj.get("num")?.as_u64().map(|n| n as usize)
    }

    /// Bytes referenced by a placeholder found anywhere in the payload.
    pub fn resolve(&self, value: &Value) -> Option<&Bytes> {
        Self::placeholder_index(value).and_then(|i| self.attachments.get(i))
    }

    /// Bytes of argument `index`, if that argument is binary.
    pub fn binary(&self, index: usize) -> Option<&Bytes> {
        self.args.get(index).and_then(|v| self.resolve(v))
    }

    pub fn has_binary(&self) -> bool {
        !self.attachments.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty() && self.attachments.is_empty()
    }

    /// The arguments as a JSON array.
    pub fn to_value(&self) -> Value {
        Value::Array(self.args.clone())
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::new().with_arg(value)
    }
}

impl From<Vec<Value>> for Payload {
    fn from(args: Vec<Value>) -> Self {
        Payload {
            args,
            attachments: Vec::new(),
        }
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::new().with_arg(s)
    }
}

impl From<Bytes> for Payload {
    fn from(data: Bytes) -> Self {
        Payload::new().with_binary(data)
    }
}

/// A decoded Socket.IO packet.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub packet_type: PacketType,
    pub namespace: String,
    pub ack_id: Option<u64>,
    pub data: Option<Value>,
    pub attachments: Vec<Bytes>,
    /// Attachments declared by the header; equals `attachments.len()` once complete.
    pub attachment_count: usize,
}

impl Packet {
    fn new(packet_type: PacketType, namespace: &str, data: Option<Value>) -> Self {
        Self {
            packet_type,
            namespace: namespace.to_string(),
            ack_id: None,
            data,
            attachments: Vec::new(),
            attachment_count: 0,
        }
    }

    /// Namespace join request, optionally carrying an auth payload.
    pub fn connect(namespace: &str, auth: Option<Value>) -> Self {
        Self::new(PacketType::Connect, namespace, auth)
    }

    pub fn disconnect(namespace: &str) -> Self {
        Self::new(PacketType::Disconnect, namespace, None)
    }

    pub fn connect_error(namespace: &str, data: Value) -> Self {
        Self::new(PacketType::ConnectError, namespace, Some(data))
    }

    /// An event; uses the binary form only when the payload carries attachments.
    pub fn event(namespace: &str, event: &str, payload: Payload, ack_id: Option<u64>) -> Self {
        let packet_type = if payload.has_binary() {
            PacketType::BinaryEvent
        } else {
            PacketType::Event
        };
        let mut items = Vec::with_capacity(payload.args.len() + 1);
        items.push(Value::String(event.to_string()));
        items.extend(payload.args);

        let mut packet = Self::new(packet_type, namespace, Some(Value::Array(items)));
        packet.ack_id = ack_id;
        packet.attachment_count = payload.attachments.len();
        packet.attachments = payload.attachments;
        packet
    }

    /// A reply to the event carrying `ack_id`.
    pub fn ack(namespace: &str, ack_id: u64, payload: Payload) -> Self {
        let packet_type = if payload.has_binary() {
            PacketType::BinaryAck
        } else {
            PacketType::Ack
        };
        let mut packet = Self::new(packet_type, namespace, Some(Value::Array(payload.args)));
        packet.ack_id = Some(ack_id);
        packet.attachment_count = payload.attachments.len();
        packet.attachments = payload.attachments;
        packet
    }

    /// Event name for event packets.
    pub fn event_name(&self) -> Option<&str> {
        if !self.packet_type.is_event() {
            return None;
        }
        self.data.as_ref()?.as_array()?.first()?.as_str()
    }

    /// Arguments of an event (without its name) or ack, with attachments.
    pub fn payload(&self) -> Payload {
        let args = match (&self.data, self.packet_type.is_event()) {
            (Some(Value::Array(items)), true) => items.iter().skip(1).cloned().collect(),
            (Some(Value::Array(items)), false) => items.clone(),
            (Some(other), _) => vec![other.clone()],
            (None, _) => Vec::new(),
        };
        Payload {
            args,
            attachments: self.attachments.clone(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.attachments.len() >= self.attachment_count
    }

    /// Type written on the wire: binary only when attachments are present.
    fn wire_type(&self) -> PacketType {
        match (self.packet_type, self.attachments.is_empty()) {
            (PacketType::Event, false) => PacketType::BinaryEvent,
            (PacketType::Ack, false) => PacketType::BinaryAck,
            (PacketType::BinaryEvent, true) => PacketType::Event,
            (PacketType::BinaryAck, true) => PacketType::Ack,
            (t, _) => t,
        }
    }

    /// Text header of this packet, including the Engine.IO `message` digit.
    pub fn encode_text(&self) -> String {
        let wire_type = self.wire_type();
        let mut out = String::with_capacity(16);
        out.push(EnginePacketType::Message.as_char());
        out.push(wire_type.as_char());
        if wire_type.is_binary() {
            out.push_str(&self.attachments.len().to_string());
            out.push('-');
        }
        if self.namespace != DEFAULT_NAMESPACE {
            out.push_str(&self.namespace);
            out.push(',');
        }
        if let Some(id) = self.ack_id {
            out.push_str(&id.to_string());
        }
        if let Some(data) = &self.data {
            out.push_str(&data.to_string());
        }
        out
    }

    /// Transport frames for this packet: the text header, then each attachment.
    pub fn encode(&self) -> Vec<Frame> {
        let mut frames = Vec::with_capacity(1 + self.attachments.len());
        frames.push(Frame::Text(self.encode_text()));
        frames.extend(self.attachments.iter().cloned().map(Frame::Binary));
        frames
    }
}

/// A decoded Engine.IO packet.
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(Handshake),
    Close,
    Ping(String),
    Pong(String),
    Message(Packet),
    Upgrade,
    Noop,
}

impl EnginePacket {
    pub fn packet_type(&self) -> EnginePacketType {
        match self {
            Self::Open(_) => EnginePacketType::Open,
            Self::Close => EnginePacketType::Close,
            Self::Ping(_) => EnginePacketType::Ping,
            Self::Pong(_) => EnginePacketType::Pong,
            Self::Message(_) => EnginePacketType::Message,
            Self::Upgrade => EnginePacketType::Upgrade,
            Self::Noop => EnginePacketType::Noop,
        }
    }

    pub fn encode(&self) -> Vec<Frame> {
        let prefix = self.packet_type().as_char();
        match self {
            Self::Message(packet) => packet.encode(),
            Self::Open(handshake) => {
                let body = serde_json::to_string(handshake).unwrap_or_else(|_| "{}".into());
                vec![Frame::Text(format!("{prefix}{body}"))]
            }
            Self::Ping(data) | Self::Pong(data) => vec![Frame::Text(format!("{prefix}{data}"))],
            Self::Close | Self::Upgrade | Self::Noop => vec![Frame::Text(prefix.to_string())],
        }
    }
}

/// Result of decoding a single frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Packet(EnginePacket),
    /// A raw binary frame belonging to a previously announced binary packet.
    Attachment(Bytes),
}

/// Decode one transport frame without any reassembly state.
pub fn decode(frame: Frame) -> Result<Decoded, DecodeError> {
    match frame {
        Frame::Binary(data) => Ok(Decoded::Attachment(data)),
        Frame::Text(text) => decode_text(&text).map(Decoded::Packet),
    }
}

fn decode_text(text: &str) -> Result<EnginePacket, DecodeError> {
    let mut chars = text.chars();
    let first = chars.next().ok_or(DecodeError::Empty)?;
    let kind = EnginePacketType::from_char(first).ok_or(DecodeError::UnknownEngineType(first))?;
    let rest = chars.as_str();

    match kind {
        EnginePacketType::Open => serde_json::from_str::<Handshake>(rest)
            .map(EnginePacket::Open)
            .map_err(|e| DecodeError::InvalidHandshake(e.to_string())),
        EnginePacketType::Close => Ok(EnginePacket::Close),
        EnginePacketType::Ping => Ok(EnginePacket::Ping(rest.to_string())),
        EnginePacketType::Pong => Ok(EnginePacket::Pong(rest.to_string())),
        EnginePacketType::Message => decode_message(rest).map(EnginePacket::Message),
        EnginePacketType::Upgrade => Ok(EnginePacket::Upgrade),
        EnginePacketType::Noop => Ok(EnginePacket::Noop),
    }
}

fn decode_message(text: &str) -> Result<Packet, DecodeError> {
    let first = text.chars().next().ok_or(DecodeError::MissingPacketType)?;
    let packet_type = PacketType::from_char(first).ok_or(DecodeError::UnknownPacketType(first))?;
    let bytes = text.as_bytes();
    let mut i = first.len_utf8();

    let mut attachment_count = 0;
    if packet_type.is_binary() {
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i == start || i >= bytes.len() || bytes[i] != b'-' {
            return Err(DecodeError::MalformedAttachmentCount);
        }
        attachment_count = text[start..i]
            .parse::<usize>()
            .map_err(|_| DecodeError::MalformedAttachmentCount)?;
        i += 1;
    }

    let mut namespace = DEFAULT_NAMESPACE;
    if i < bytes.len() && bytes[i] == b'/' {
        let start = i;
        loop {
            match bytes.get(i) {
                Some(b',') => break,
                Some(b'[') | Some(b'{') | Some(b'"') | None => {
                    return Err(DecodeError::UnterminatedNamespace)
                }
                Some(_) => i += 1,
            }
        }
        namespace = &text[start..i];
        i += 1;
    }

    let start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    let ack_id = if i > start {
        let digits = &text[start..i];
        Some(
            digits
                .parse::<u64>()
                .map_err(|_| DecodeError::InvalidAckId(digits.to_string()))?,
        )
    } else {
        None
    };

    let data = match text[i..].chars().next() {
        None => None,
        Some('[') | Some('{') | Some('"') => Some(
            serde_json::from_str::<Value>(&text[i..])
                .map_err(|e| DecodeError::InvalidPayload(e.to_string()))?,
        ),
        Some(c) => return Err(DecodeError::UnexpectedCharacter(c)),
    };

    validate(packet_type, ack_id, data.as_ref())?;

    Ok(Packet {
        packet_type,
        namespace: namespace.to_string(),
        ack_id,
        data,
        attachments: Vec::new(),
        attachment_count,
    })
}

fn validate(packet_type: PacketType, ack_id: Option<u64>, data: Option<&Value>) -> Result<(), DecodeError> {
    match packet_type {
        PacketType::Event | PacketType::BinaryEvent => {
            let named = data
                .and_then(Value::as_array)
                .and_then(|items| items.first())
                .map(Value::is_string)
                .unwrap_or(false);
            if !named {
                return Err(DecodeError::InvalidPayload(
                    "event payload must be an array starting with the event name".into(),
                ));
            }
        }
        PacketType::Ack | PacketType::BinaryAck => {
            if ack_id.is_none() {
                return Err(DecodeError::InvalidAckId("missing".into()));
            }
            if !matches!(data, Some(Value::Array(_))) {
                return Err(DecodeError::InvalidPayload("ack payload must be an array".into()));
            }
        }
        PacketType::Connect => {
            if !matches!(data, None | Some(Value::Object(_))) {
                return Err(DecodeError::InvalidPayload("connect payload must be an object".into()));
            }
        }
        PacketType::Disconnect | PacketType::ConnectError => {}
    }
    Ok(())
}

/// Stateful decoder that reassembles binary packets.
///
/// Binary frames fill the oldest incomplete packet. Text frames that arrive
/// in between are decoded and returned as usual.
#[derive(Debug, Default)]
pub struct PacketDecoder {
    partial: VecDeque<Packet>,
}

impl PacketDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one frame. Returns `Ok(None)` while a binary packet is still incomplete.
    pub fn feed(&mut self, frame: Frame) -> Result<Option<EnginePacket>, DecodeError> {
        match decode(frame)? {
            Decoded::Attachment(data) => {
                let packet = self
                    .partial
                    .front_mut()
                    .ok_or(DecodeError::UnexpectedAttachment)?;
                packet.attachments.push(data);
                if packet.is_complete() {
                    Ok(self.partial.pop_front().map(EnginePacket::Message))
                } else {
                    Ok(None)
                }
            }
            Decoded::Packet(EnginePacket::Message(packet)) if !packet.is_complete() => {
                self.partial.push_back(packet);
                Ok(None)
            }
            Decoded::Packet(packet) => Ok(Some(packet)),
        }
    }

    /// Binary packets still waiting for attachments.
    pub fn pending(&self) -> usize {
        self.partial.len()
    }

    /// Drop all partial state.
    pub fn reset(&mut self) {
        self.partial.clear();
    }
}
