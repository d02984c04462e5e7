//! Connection state machine.
//!
//! A session runs as one task on the I/O runtime. It exclusively owns the
//! current transport, answers pings, watches server liveness, expires acks and
//! decides between reconnecting and giving up. Everything the callback
//! context needs to see is posted to the hand-off queue.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, timeout, Instant};
use tracing::{debug, info, warn};
use url::Url;

use sio_core::config::AppConfig;
use sio_core::constants::{
    DEFAULT_ACK_TIMEOUT_MS, DEFAULT_CLOSE_TIMEOUT_MS, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_NAMESPACE,
    DEFAULT_PATH, DEFAULT_PENDING_QUEUE_CAPACITY, ENGINE_IO_VERSION,
};

use crate::ack::AckTracker;
use crate::codec::{self, Decoded, EnginePacket, Frame, Handshake, Packet, PacketDecoder, PacketType};
use crate::error::{AckError, SocketError, SocketResult};
use crate::events::{Command, ConnectionState, DisconnectReason, EngineEvent};
use crate::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::transport::{Connector, Transport, TransportOptions};

/// Options for one `connect()`.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Server resource path, `socket.io` by default.
    pub path: String,
    /// Extra query parameters on the connection URL.
    pub query: BTreeMap<String, String>,
    /// Extra headers on the websocket upgrade request.
    pub headers: BTreeMap<String, String>,
    /// Sent with every namespace connect packet.
    pub auth: Option<serde_json::Value>,
    pub accept_invalid_certs: bool,
    /// Namespaces joined in addition to `/`.
    pub namespaces: Vec<String>,
    pub connect_timeout: Duration,
    pub close_timeout: Duration,
    /// Used by `emit_with_ack` when the caller gives no timeout.
    pub ack_timeout: Duration,
    pub pending_queue_capacity: usize,
    pub reconnect: ReconnectConfig,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            path: DEFAULT_PATH.to_string(),
            query: BTreeMap::new(),
            headers: BTreeMap::new(),
            auth: None,
            accept_invalid_certs: false,
            namespaces: Vec::new(),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            close_timeout: Duration::from_millis(DEFAULT_CLOSE_TIMEOUT_MS),
            ack_timeout: Duration::from_millis(DEFAULT_ACK_TIMEOUT_MS),
            pending_queue_capacity: DEFAULT_PENDING_QUEUE_CAPACITY,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl From<&AppConfig> for ConnectOptions {
    fn from(config: &AppConfig) -> Self {
        let client = &config.client;
        Self {
            path: client.path.clone(),
            query: client.query.clone(),
            headers: client.headers.clone(),
            auth: client.auth.clone(),
            accept_invalid_certs: client.accept_invalid_certs,
            namespaces: client.namespaces.clone(),
            connect_timeout: Duration::from_millis(client.connect_timeout_ms),
            close_timeout: Duration::from_millis(client.close_timeout_ms),
            ack_timeout: Duration::from_millis(client.ack_timeout_ms),
            pending_queue_capacity: client.pending_queue_capacity,
            reconnect: ReconnectConfig::from(&config.reconnect),
        }
    }
}

impl ConnectOptions {
    pub(crate) fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            headers: self.headers.clone(),
            accept_invalid_certs: self.accept_invalid_certs,
        }
    }
}

/// Build the Engine.IO websocket URL for `base`.
///
/// `http`/`ws` map to `ws`, `https`/`wss` to `wss`. The configured path is
/// used when `base` has no resource path of its own or a non-default path is
/// configured. The query carries `EIO`, `transport` and a `t` cache buster,
/// then the query of `base` and `extra`.
pub fn build_engine_url(base: &Url, path: &str, extra: &BTreeMap<String, String>) -> SocketResult<Url> {
    let scheme = match base.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(SocketError::InvalidUrl(format!("unsupported scheme {other}"))),
    };
    if base.host_str().map(str::is_empty).unwrap_or(true) {
        return Err(SocketError::InvalidUrl(format!("missing host in {base}")));
    }

    let mut url = base.clone();
    url.set_scheme(scheme)
        .map_err(|_| SocketError::InvalidUrl(format!("cannot use scheme {scheme} for {base}")))?;

    let has_own_path = !matches!(base.path(), "" | "/");
    if !has_own_path || path.trim_matches('/') != DEFAULT_PATH {
        url.set_path(&format!("/{}/", path.trim_matches('/')));
    }

    let inherited: Vec<(String, String)> = base.query_pairs().into_owned().collect();
    url.set_query(None);
    url.set_fragment(None);
    {
        let mut pairs = url.query_pairs_mut();
        pairs
            .append_pair("EIO", &ENGINE_IO_VERSION.to_string())
            .append_pair("transport", "websocket")
            .append_pair("t", &chrono::Utc::now().timestamp_millis().to_string());
        for (k, v) in inherited.iter().filter(|(k, _)| !is_reserved_param(k)) {
            pairs.append_pair(k, v);
        }
        for (k, v) in extra.iter().filter(|(k, _)| !is_reserved_param(k)) {
            pairs.append_pair(k, v);
        }
    }
    Ok(url)
}

fn is_reserved_param(key: &str) -> bool {
    matches!(key, "EIO" | "transport" | "t" | "sid")
}

/// Host hook invoked whenever new work waits for the callback context.
pub type Notifier = Arc<dyn Fn() + Send + Sync + 'static>;

/// Sending half of the I/O to callback-context hand-off.
#[derive(Clone)]
pub(crate) struct Outbox {
    epoch: u64,
    tx: UnboundedSender<(u64, EngineEvent)>,
    notifier: Arc<RwLock<Option<Notifier>>>,
}

impl Outbox {
    /// `epoch` identifies the `connect()` call the posting session belongs to.
    pub(crate) fn new(
        epoch: u64,
        tx: UnboundedSender<(u64, EngineEvent)>,
        notifier: Arc<RwLock<Option<Notifier>>>,
    ) -> Self {
        Self { epoch, tx, notifier }
    }

    pub(crate) fn post(&self, event: EngineEvent) {
        if self.tx.send((self.epoch, event)).is_err() {
            debug!("callback context is gone, dropping engine event");
            return;
        }
        let notifier = self.notifier.read().clone();
        if let Some(notify) = notifier {
            notify();
        }
    }
}

/// Shared pieces a session needs from its client.
pub(crate) struct SessionHandles {
    pub connector: Arc<dyn Connector>,
    pub policy: ReconnectPolicy,
    pub acks: Arc<Mutex<AckTracker>>,
    pub state: Arc<watch::Sender<ConnectionState>>,
    pub outbox: Outbox,
}

/// One logical connection, driven on the I/O runtime.
pub(crate) struct Session {
    url: Url,
    options: ConnectOptions,
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    acks: Arc<Mutex<AckTracker>>,
    state: Arc<watch::Sender<ConnectionState>>,
    outbox: Outbox,
    decoder: PacketDecoder,
}

impl Session {
    pub(crate) fn new(url: Url, options: ConnectOptions, handles: SessionHandles) -> Self {
        Self {
            url,
            options,
            connector: handles.connector,
            policy: handles.policy,
            acks: handles.acks,
            state: handles.state,
            outbox: handles.outbox,
            decoder: PacketDecoder::new(),
        }
    }

    /// Update the shared state, logging the transition. A local `Closing` can
    /// only be followed by `Disconnected`.
    fn set_state(&self, new_state: ConnectionState) {
        self.state.send_if_modified(|state| {
            if *state == new_state
                || (*state == ConnectionState::Closing && new_state != ConnectionState::Disconnected)
            {
                return false;
            }
            info!("socket state: {} -> {}", *state, new_state);
            *state = new_state;
            true
        });
    }

    /// Drive the session until it is disconnected for good.
    ///
    /// `previous` is the task of an earlier session on the same client; it is
    /// awaited first so two transports are never alive at once.
    pub(crate) async fn run(mut self, mut commands: UnboundedReceiver<Command>, previous: Option<JoinHandle<()>>) {
        if let Some(handle) = previous {
            let _ = handle.await;
        }

        let mut attempt: u32 = 0;
        let reason = loop {
            self.set_state(ConnectionState::Connecting);
            info!("socket connecting to {}", self.url);

            let established = tokio::select! {
                result = self.establish() => result,
                _ = reject_until_disconnect(&mut commands, &self.acks, &self.outbox) => {
                    break DisconnectReason::IoClientDisconnect;
                }
            };

            let lost = match established {
                Ok((transport, handshake)) => {
                    if attempt > 0 {
                        info!("reconnected successfully after {attempt} attempt(s)");
                    }
                    attempt = 0;
                    self.set_state(ConnectionState::Connected);
                    info!(
                        "engine.io session {} open (ping interval {}ms, timeout {}ms)",
                        handshake.sid, handshake.ping_interval, handshake.ping_timeout
                    );
                    self.outbox.post(EngineEvent::Connected {
                        sid: handshake.sid.clone(),
                    });
                    self.drive(transport, &handshake, &mut commands).await
                }
                Err(e) => {
                    warn!("connection attempt failed: {e}");
                    DisconnectReason::TransportError
                }
            };

            self.decoder.reset();
            let settled = self.acks.lock().reset();
            for ack in settled {
                self.outbox.post(EngineEvent::AckSettled(ack));
            }

            if !lost.is_recoverable() {
                break lost;
            }
            attempt = attempt.saturating_add(1);
            if !self.policy.should_retry(attempt) {
                if self.policy.config().max_attempts > 0 && attempt > self.policy.config().max_attempts {
                    warn!(
                        "max reconnection attempts ({}) reached",
                        self.policy.config().max_attempts
                    );
                }
                break lost;
            }

            let delay = self.policy.next_delay(attempt);
            self.set_state(ConnectionState::Reconnecting);
            warn!(
                "connection lost ({lost}), reconnection attempt {attempt} in {:.1}s",
                delay.as_secs_f64()
            );
            self.outbox.post(EngineEvent::Reconnecting { attempt, delay });

            tokio::select! {
                _ = sleep(delay) => {}
                _ = reject_until_disconnect(&mut commands, &self.acks, &self.outbox) => {
                    info!("reconnection cancelled by disconnect request");
                    break DisconnectReason::IoClientDisconnect;
                }
            }
        };

        self.set_state(ConnectionState::Disconnected);
        info!("socket disconnected ({reason})");
        self.outbox.post(EngineEvent::Disconnected { reason });
    }

    /// Open a transport and wait for the Engine.IO open packet.
    async fn establish(&self) -> SocketResult<(Box<dyn Transport>, Handshake)> {
        let url = build_engine_url(&self.url, &self.options.path, &self.options.query)?;
        let transport_options = self.options.transport_options();

        let handshake = async {
            let mut transport = self.connector.connect(&url, &transport_options).await?;
            loop {
                match transport.recv().await {
                    None => {
                        return Err(SocketError::Handshake(
                            "transport closed before the open packet".into(),
                        ))
                    }
                    Some(Err(e)) => return Err(e),
                    Some(Ok(frame)) => match codec::decode(frame) {
                        Ok(Decoded::Packet(EnginePacket::Open(handshake))) => {
                            if handshake.sid.is_empty() {
                                return Err(SocketError::Handshake("empty session id".into()));
                            }
                            return Ok((transport, handshake));
                        }
                        Ok(other) => debug!("ignoring {other:?} before the handshake"),
                        Err(e) => return Err(SocketError::Handshake(e.to_string())),
                    },
                }
            }
        };

        timeout(self.options.connect_timeout, handshake)
            .await
            .map_err(|_| SocketError::Handshake("timed out waiting for the open packet".into()))?
    }

    /// Run a connected transport until it is lost or closed.
    async fn drive(
        &mut self,
        mut transport: Box<dyn Transport>,
        handshake: &Handshake,
        commands: &mut UnboundedReceiver<Command>,
    ) -> DisconnectReason {
        let window = handshake.liveness_window();
        let mut last_activity = Instant::now();

        let join = Packet::connect(DEFAULT_NAMESPACE, self.options.auth.clone());
        if let Err(e) = write_packet(transport.as_mut(), &join).await {
            warn!("failed to join the default namespace: {e}");
            return DisconnectReason::TransportClose;
        }

        loop {
            let ack_deadline = self.acks.lock().next_deadline();

            tokio::select! {
                incoming = transport.recv() => match incoming {
                    None => {
                        info!("transport closed by peer");
                        return DisconnectReason::TransportClose;
                    }
                    Some(Err(e)) => {
                        warn!("transport error: {e}");
                        return DisconnectReason::TransportClose;
                    }
                    Some(Ok(frame)) => {
                        last_activity = Instant::now();
                        match self.decoder.feed(frame) {
                            Ok(Some(packet)) => {
                                if let Some(reason) = self.handle_packet(transport.as_mut(), packet).await {
                                    return reason;
                                }
                            }
                            Ok(None) => {}
                            Err(e) => warn!("dropping undecodable frame: {e}"),
                        }
                    }
                },
                command = commands.recv() => match command {
                    Some(Command::Send { packet, generation }) => {
                        let current = self.acks.lock().generation();
                        if generation.is_some_and(|g| g != current) {
                            warn!("dropping packet registered before the connection reset");
                            continue;
                        }
                        if let Err(e) = write_packet(transport.as_mut(), &packet).await {
                            warn!("write failed: {e}");
                            return DisconnectReason::TransportClose;
                        }
                    }
                    Some(Command::Disconnect) | None => {
                        self.close(transport.as_mut()).await;
                        return DisconnectReason::IoClientDisconnect;
                    }
                },
                _ = sleep_until(last_activity + window) => {
                    warn!("no server activity for {}ms, ping timeout", window.as_millis());
                    return DisconnectReason::PingTimeout;
                }
                _ = sleep_until(ack_deadline.unwrap_or_else(Instant::now)), if ack_deadline.is_some() => {
                    let expired = self.acks.lock().expire(Instant::now());
                    for ack in expired {
                        self.outbox.post(EngineEvent::AckSettled(ack));
                    }
                }
            }
        }
    }

    /// Handle one complete packet. Returns a reason when the connection must end.
    async fn handle_packet(&mut self, transport: &mut dyn Transport, packet: EnginePacket) -> Option<DisconnectReason> {
        match packet {
            EnginePacket::Ping(data) => {
                if let Err(e) = write_frames(transport, EnginePacket::Pong(data).encode()).await {
                    warn!("failed to answer ping: {e}");
                    return Some(DisconnectReason::TransportClose);
                }
                None
            }
            EnginePacket::Pong(_) | EnginePacket::Noop | EnginePacket::Upgrade => None,
            EnginePacket::Open(_) => {
                warn!("ignoring a second open packet");
                None
            }
            EnginePacket::Close => {
                info!("server closed the engine.io session");
                Some(DisconnectReason::TransportClose)
            }
            EnginePacket::Message(packet) => self.handle_message(packet),
        }
    }

    fn handle_message(&mut self, packet: Packet) -> Option<DisconnectReason> {
        let on_default = packet.namespace == DEFAULT_NAMESPACE;
        match packet.packet_type {
            PacketType::Ack | PacketType::BinaryAck => {
                let id = packet.ack_id?;
                let settled = self.acks.lock().resolve(&packet.namespace, id, packet.payload());
                if let Some(ack) = settled {
                    self.outbox.post(EngineEvent::AckSettled(ack));
                }
                None
            }
            PacketType::Disconnect if on_default => {
                info!("server disconnected the session");
                Some(DisconnectReason::IoServerDisconnect)
            }
            PacketType::ConnectError if on_default => {
                warn!("server rejected the default namespace: {:?}", packet.data);
                self.outbox.post(EngineEvent::Packet(packet));
                Some(DisconnectReason::IoServerDisconnect)
            }
            _ => {
                self.outbox.post(EngineEvent::Packet(packet));
                None
            }
        }
    }

    /// Leave politely and give the transport `close_timeout` to finish.
    async fn close(&mut self, transport: &mut dyn Transport) {
        self.set_state(ConnectionState::Closing);
        let close_timeout = self.options.close_timeout;
        let closing = async {
            write_packet(transport, &Packet::disconnect(DEFAULT_NAMESPACE)).await?;
            write_frames(transport, EnginePacket::Close.encode()).await?;
            transport.close().await?;
            while let Some(frame) = transport.recv().await {
                if let Err(e) = frame {
                    debug!("transport error while closing: {e}");
                    break;
                }
            }
            Ok::<(), SocketError>(())
        };
        match timeout(close_timeout, closing).await {
            Ok(Ok(())) => debug!("transport closed cleanly"),
            Ok(Err(e)) => debug!("transport close failed: {e}"),
            Err(_) => debug!("transport close timed out after {}ms", close_timeout.as_millis()),
        }
    }
}

async fn write_frames(transport: &mut dyn Transport, frames: Vec<Frame>) -> SocketResult<()> {
    for frame in frames {
        transport.send(frame).await?;
    }
    Ok(())
}

async fn write_packet(transport: &mut dyn Transport, packet: &Packet) -> SocketResult<()> {
    write_frames(transport, packet.encode()).await
}

/// Wait for a disconnect request while no transport is usable, failing any
/// ack-carrying sends that arrive in the meantime.
async fn reject_until_disconnect(
    commands: &mut UnboundedReceiver<Command>,
    acks: &Mutex<AckTracker>,
    outbox: &Outbox,
) {
    while let Some(command) = commands.recv().await {
        match command {
            Command::Disconnect => return,
            Command::Send { packet, generation } => {
                warn!("not connected, dropping outbound {:?} packet", packet.packet_type);
                let settled = match (packet.ack_id, generation) {
                    (Some(id), Some(generation)) => {
                        let mut acks = acks.lock();
                        if acks.generation() == generation {
                            acks.fail(id, AckError::NotConnected)
                        } else {
                            None
                        }
                    }
                    _ => None,
                };
                if let Some(ack) = settled {
                    outbox.post(EngineEvent::AckSettled(ack));
                }
            }
        }
    }
}
