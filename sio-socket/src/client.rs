//! Public Socket.IO client.
//!
//! [`SocketClient`] is owned by the host's callback context. The I/O task
//! only ever posts to the hand-off queue; handlers, lifecycle listeners and
//! ack continuations all run inside [`SocketClient::pump`] (or
//! [`SocketClient::pump_async`]), on whichever thread calls it.
//!
//! Emits from other threads go through an [`Emitter`], which queues them for
//! the next pump.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::runtime::{Handle, Runtime};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use url::Url;

use sio_core::constants::DEFAULT_NAMESPACE;

use crate::ack::{AckCallback, AckTracker, SettledAck};
use crate::codec::{Packet, PacketType, Payload};
use crate::error::{AckError, SocketError, SocketResult};
use crate::events::{ClientEvent, Command, ConnectionState, EngineEvent, EventDispatcher};
use crate::namespace::{Event, HandlerId, Multiplexer, QueuedAck, QueuedEmit};
use crate::reconnect::ReconnectPolicy;
use crate::session::{build_engine_url, ConnectOptions, Notifier, Outbox, Session, SessionHandles};
use crate::transport::{Connector, WsConnector};

type LifecycleListener = Box<dyn FnMut(&ClientEvent) + 'static>;

/// Capacity of the lifecycle broadcast channel.
const LIFECYCLE_CHANNEL_CAPACITY: usize = 64;

/// An emit requested from another thread.
struct EmitRequest {
    namespace: String,
    event: String,
    payload: Payload,
    ack: Option<(AckCallback, Option<Duration>)>,
}

/// Cloneable, `Send` handle for emitting from any thread.
#[derive(Clone)]
pub struct Emitter {
    tx: UnboundedSender<EmitRequest>,
    state: watch::Receiver<ConnectionState>,
    notifier: Arc<RwLock<Option<Notifier>>>,
}

impl Emitter {
    pub fn emit(&self, namespace: &str, event: &str, payload: impl Into<Payload>) -> SocketResult<()> {
        self.submit(EmitRequest {
            namespace: namespace.to_string(),
            event: event.to_string(),
            payload: payload.into(),
            ack: None,
        })
    }

    /// Emit and run `callback` on the callback context once the server
    /// acknowledges, or with the reason it never will.
    pub fn emit_with_ack<F>(
        &self,
        namespace: &str,
        event: &str,
        payload: impl Into<Payload>,
        timeout: Option<Duration>,
        callback: F,
    ) -> SocketResult<()>
    where
        F: FnOnce(Result<Payload, AckError>) + Send + 'static,
    {
        self.submit(EmitRequest {
            namespace: namespace.to_string(),
            event: event.to_string(),
            payload: payload.into(),
            ack: Some((Box::new(callback), timeout)),
        })
    }

    pub fn status(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn submit(&self, request: EmitRequest) -> SocketResult<()> {
        if self.status().rejects_emits() {
            return Err(SocketError::NotConnected);
        }
        self.tx
            .send(request)
            .map_err(|_| SocketError::NotConnected)?;
        let notifier = self.notifier.read().clone();
        if let Some(notify) = notifier {
            notify();
        }
        Ok(())
    }
}

/// A Socket.IO client session with namespace multiplexing and acks.
pub struct SocketClient {
    runtime: Option<Runtime>,
    handle: Handle,
    connector: Arc<dyn Connector>,
    options: ConnectOptions,
    policy: ReconnectPolicy,
    acks: Arc<Mutex<AckTracker>>,
    state: Arc<watch::Sender<ConnectionState>>,
    notifier: Arc<RwLock<Option<Notifier>>>,
    inbox_tx: UnboundedSender<(u64, EngineEvent)>,
    inbox: UnboundedReceiver<(u64, EngineEvent)>,
    emit_tx: UnboundedSender<EmitRequest>,
    emit_rx: UnboundedReceiver<EmitRequest>,
    commands: Option<UnboundedSender<Command>>,
    engine: Option<JoinHandle<()>>,
    epoch: u64,
    sid: Option<String>,
    mux: Multiplexer,
    listeners: Vec<LifecycleListener>,
    dispatcher: EventDispatcher,
}

impl SocketClient {
    /// Create a client with its own single-threaded I/O runtime (`sio-io`).
    pub fn new() -> SocketResult<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("sio-io")
            .enable_all()
            .build()
            .map_err(|e| SocketError::Runtime(e.to_string()))?;
        let handle = runtime.handle().clone();
        Ok(Self::build(Some(runtime), handle))
    }

    /// Create a client whose I/O task runs on an existing runtime.
    pub fn with_runtime(handle: Handle) -> Self {
        Self::build(None, handle)
    }

    /// Replace the websocket connector, e.g. with an in-memory one.
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    fn build(runtime: Option<Runtime>, handle: Handle) -> Self {
        let options = ConnectOptions::default();
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        let (emit_tx, emit_rx) = mpsc::unbounded_channel();
        Self {
            runtime,
            handle,
            connector: Arc::new(WsConnector),
            policy: ReconnectPolicy::new(options.reconnect.clone()),
            mux: Multiplexer::new(options.pending_queue_capacity),
            options,
            acks: Arc::new(Mutex::new(AckTracker::new())),
            state: Arc::new(state),
            notifier: Arc::new(RwLock::new(None)),
            inbox_tx,
            inbox,
            emit_tx,
            emit_rx,
            commands: None,
            engine: None,
            epoch: 0,
            sid: None,
            listeners: Vec::new(),
            dispatcher: EventDispatcher::new(LIFECYCLE_CHANNEL_CAPACITY),
        }
    }

    /// Current connection state.
    pub fn status(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Subscribe to connection state changes.
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Subscribe to lifecycle events from async code.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.dispatcher.subscribe()
    }

    /// Engine.IO session id of the current connection.
    pub fn sid(&self) -> Option<&str> {
        self.sid.as_deref()
    }

    pub fn is_joined(&self, namespace: &str) -> bool {
        self.mux.is_joined(namespace)
    }

    /// Called from the I/O thread whenever work is waiting for [`pump`](Self::pump).
    pub fn set_notifier<F>(&mut self, notifier: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.notifier.write() = Some(Arc::new(notifier));
    }

    /// Listen to lifecycle events on the callback context.
    pub fn on_lifecycle<F>(&mut self, listener: F)
    where
        F: FnMut(&ClientEvent) + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    pub fn emitter(&self) -> Emitter {
        Emitter {
            tx: self.emit_tx.clone(),
            state: self.state.subscribe(),
            notifier: self.notifier.clone(),
        }
    }

    /// Start connecting to `url`. Ignored unless the client is disconnected.
    pub fn connect(&mut self, url: &str, options: ConnectOptions) -> SocketResult<()> {
        let current = self.status();
        if current != ConnectionState::Disconnected {
            debug!("already {current}, skipping connect");
            return Ok(());
        }

        let base = Url::parse(url).map_err(|e| SocketError::InvalidUrl(format!("{url}: {e}")))?;
        build_engine_url(&base, &options.path, &options.query)?;
        for namespace in &options.namespaces {
            Multiplexer::validate_name(namespace)?;
        }
        for namespace in &options.namespaces {
            self.mux.join(namespace)?;
        }
        self.mux.set_capacity(options.pending_queue_capacity);

        self.epoch += 1;
        self.policy = ReconnectPolicy::new(options.reconnect.clone());
        self.options = options;
        self.sid = None;

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let handles = SessionHandles {
            connector: self.connector.clone(),
            policy: self.policy.clone(),
            acks: self.acks.clone(),
            state: self.state.clone(),
            outbox: Outbox::new(self.epoch, self.inbox_tx.clone(), self.notifier.clone()),
        };
        let session = Session::new(base, self.options.clone(), handles);

        self.state.send_if_modified(|state| {
            info!("socket state: {} -> {}", *state, ConnectionState::Connecting);
            *state = ConnectionState::Connecting;
            true
        });

        let previous = self.engine.take();
        self.engine = Some(self.handle.spawn(session.run(commands_rx, previous)));
        self.commands = Some(commands_tx);
        Ok(())
    }

    /// Disconnect and stop reconnecting. Idempotent.
    ///
    /// New emits fail with `NotConnected` from here on; queued emits and
    /// pending acks are cancelled.
    pub fn disconnect(&mut self) {
        let current = self.status();
        if matches!(current, ConnectionState::Disconnected | ConnectionState::Closing) {
            debug!("already {current}, skipping disconnect");
            return;
        }

        self.policy.cancel();
        self.state.send_if_modified(|state| {
            info!("socket state: {} -> {}", *state, ConnectionState::Closing);
            *state = ConnectionState::Closing;
            true
        });

        if let Some(commands) = &self.commands {
            for namespace in self.mux.named() {
                if self.mux.is_joined(&namespace) {
                    let _ = commands.send(Command::Send {
                        packet: Packet::disconnect(&namespace),
                        generation: None,
                    });
                }
            }
            let _ = commands.send(Command::Disconnect);
        }

        self.mux.mark_all_unjoined();
        self.cancel_all(AckError::Cancelled);
        info!("socket disconnect requested");
    }

    /// Track `namespace` and ask the server to join it if connected.
    pub fn join(&mut self, namespace: &str) -> SocketResult<()> {
        self.track(namespace)
    }

    /// Leave `namespace`, dropping its handlers and cancelling its queued emits.
    pub fn leave(&mut self, namespace: &str) -> SocketResult<()> {
        let Some((joined, queued)) = self.mux.leave(namespace)? else {
            return Ok(());
        };
        if joined {
            self.send(Packet::disconnect(namespace), None)?;
        }
        for emit in queued {
            settle_queued(namespace, emit, AckError::Cancelled);
        }
        info!("left namespace {namespace}");
        Ok(())
    }

    /// Register `handler` for `event` on `namespace`, joining it if needed.
    pub fn on<F>(&mut self, namespace: &str, event: &str, handler: F) -> SocketResult<HandlerId>
    where
        F: FnMut(&Event) -> anyhow::Result<()> + 'static,
    {
        self.track(namespace)?;
        self.mux.on(namespace, event, Box::new(handler))
    }

    pub fn off(&mut self, namespace: &str, event: &str, id: HandlerId) -> bool {
        self.mux.off(namespace, event, id)
    }

    pub fn emit(&mut self, namespace: &str, event: &str, payload: impl Into<Payload>) -> SocketResult<()> {
        self.emit_inner(namespace, event, payload.into(), None)
    }

    /// Emit expecting an acknowledgement. `timeout` defaults to the configured ack timeout.
    pub fn emit_with_ack<F>(
        &mut self,
        namespace: &str,
        event: &str,
        payload: impl Into<Payload>,
        timeout: Option<Duration>,
        callback: F,
    ) -> SocketResult<()>
    where
        F: FnOnce(Result<Payload, AckError>) + Send + 'static,
    {
        let timeout = timeout.unwrap_or(self.options.ack_timeout);
        self.emit_inner(namespace, event, payload.into(), Some((Box::new(callback), timeout)))
    }

    /// Process everything waiting in the hand-off queues. Returns the number of items handled.
    pub fn pump(&mut self) -> usize {
        let mut handled = self.expire_queued();
        loop {
            if let Ok(request) = self.emit_rx.try_recv() {
                self.handle_emit_request(request);
                handled += 1;
                continue;
            }
            match self.inbox.try_recv() {
                Ok((epoch, event)) => {
                    self.handle_engine_event(epoch, event);
                    handled += 1;
                }
                Err(_) => break,
            }
        }
        handled
    }

    /// Wait until work arrives, then process everything waiting.
    pub async fn pump_async(&mut self) -> usize {
        let deadline = self.mux.next_queued_deadline();
        tokio::select! {
            Some((epoch, event)) = self.inbox.recv() => self.handle_engine_event(epoch, event),
            Some(request) = self.emit_rx.recv() => self.handle_emit_request(request),
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                return self.pump();
            }
            else => return 0,
        }
        1 + self.pump()
    }

    /// Time out acks of emits still waiting for their namespace to join.
    fn expire_queued(&mut self) -> usize {
        let expired = self.mux.expire_queued(Instant::now());
        for (namespace, emit) in &expired {
            warn!("{} on {namespace} timed out waiting for the namespace to join", emit.event);
        }
        let count = expired.len();
        for (namespace, emit) in expired {
            settle_queued(&namespace, emit, AckError::Timeout);
        }
        count
    }

    fn track(&mut self, namespace: &str) -> SocketResult<()> {
        self.mux.join(namespace)?;
        if namespace != DEFAULT_NAMESPACE
            && self.status() == ConnectionState::Connected
            && self.mux.needs_join(namespace)
        {
            self.request_join(namespace);
        }
        Ok(())
    }

    fn request_join(&mut self, namespace: &str) {
        debug!("joining namespace {namespace}");
        match self.send(Packet::connect(namespace, self.options.auth.clone()), None) {
            Ok(()) => self.mux.mark_join_requested(namespace),
            Err(e) => warn!("cannot join {namespace}: {e}"),
        }
    }

    fn send(&self, packet: Packet, generation: Option<u64>) -> SocketResult<()> {
        let commands = self.commands.as_ref().ok_or(SocketError::NotConnected)?;
        commands
            .send(Command::Send { packet, generation })
            .map_err(|_| SocketError::NotConnected)
    }

    fn emit_inner(
        &mut self,
        namespace: &str,
        event: &str,
        payload: Payload,
        ack: Option<(AckCallback, Duration)>,
    ) -> SocketResult<()> {
        if self.status().rejects_emits() {
            return Err(SocketError::NotConnected);
        }
        self.track(namespace)?;

        if self.mux.is_joined(namespace) {
            return self.write_emit(namespace, event, payload, ack);
        }

        debug!("queueing {event} until {namespace} joins");
        let queued = QueuedEmit {
            event: event.to_string(),
            payload,
            ack: ack.map(|(callback, timeout)| QueuedAck {
                callback,
                deadline: Instant::now() + timeout,
            }),
        };
        if let Some(dropped) = self.mux.enqueue(namespace, queued)? {
            settle_queued(namespace, dropped, AckError::Dropped);
            let total = self.mux.get(namespace).map(|ns| ns.dropped()).unwrap_or(0);
            self.fire(ClientEvent::Backpressure {
                namespace: namespace.to_string(),
                dropped: total,
            });
        }
        Ok(())
    }

    /// Register the ack (if any) and hand the event to the I/O task.
    fn write_emit(
        &mut self,
        namespace: &str,
        event: &str,
        payload: Payload,
        ack: Option<(AckCallback, Duration)>,
    ) -> SocketResult<()> {
        let (ack_id, generation) = match ack {
            Some((callback, timeout)) => {
                let mut acks = self.acks.lock();
                let id = acks.register(namespace, timeout, callback);
                (Some(id), Some(acks.generation()))
            }
            None => (None, None),
        };

        let packet = Packet::event(namespace, event, payload, ack_id);
        let result = self.send(packet, generation);
        if result.is_err() {
            if let Some(id) = ack_id {
                let failed = self.acks.lock().fail(id, AckError::NotConnected);
                if let Some(settled) = failed {
                    settled.invoke();
                }
            }
        }
        result
    }

    fn handle_emit_request(&mut self, request: EmitRequest) {
        let EmitRequest {
            namespace,
            event,
            payload,
            ack,
        } = request;
        let ack = ack.map(|(callback, timeout)| (callback, timeout.unwrap_or(self.options.ack_timeout)));
        if self.status().rejects_emits() {
            if let Some((callback, _)) = ack {
                SettledAck::immediate(&namespace, callback, AckError::NotConnected).invoke();
            }
            return;
        }
        if let Err(e) = self.emit_inner(&namespace, &event, payload, ack) {
            warn!("queued emit of {event} on {namespace} failed: {e}");
        }
    }

    fn handle_engine_event(&mut self, epoch: u64, event: EngineEvent) {
        let stale = epoch != self.epoch;
        match event {
            EngineEvent::AckSettled(settled) => settled.invoke(),
            EngineEvent::Disconnected { reason } if stale => {
                self.fire(ClientEvent::Disconnect { reason });
            }
            other if stale => debug!("ignoring {other:?} from a previous connection"),
            EngineEvent::Connected { sid } => {
                self.sid = Some(sid);
                for namespace in self.mux.named() {
                    if self.mux.needs_join(&namespace) {
                        self.request_join(&namespace);
                    }
                }
            }
            EngineEvent::Reconnecting { attempt, delay } => {
                self.mux.mark_all_unjoined();
                self.fire(ClientEvent::Reconnecting { attempt, delay });
            }
            EngineEvent::Disconnected { reason } => {
                self.mux.mark_all_unjoined();
                self.cancel_all(AckError::NotConnected);
                self.commands = None;
                self.sid = None;
                self.fire(ClientEvent::Disconnect { reason });
            }
            EngineEvent::Packet(packet) => self.handle_packet(packet),
        }
    }

    fn handle_packet(&mut self, packet: Packet) {
        let namespace = packet.namespace.clone();
        match packet.packet_type {
            PacketType::Connect => {
                if self.mux.get(&namespace).is_none() {
                    warn!("join confirmation for namespace {namespace} that was left");
                    return;
                }
                let queued = self.mux.mark_joined(&namespace);
                info!("joined namespace {namespace} ({} queued emit(s))", queued.len());
                for emit in queued {
                    let now = Instant::now();
                    let ack = emit
                        .ack
                        .map(|a| (a.callback, a.deadline.saturating_duration_since(now)));
                    if let Err(e) = self.write_emit(&namespace, &emit.event, emit.payload, ack) {
                        warn!("flushing {} on {namespace} failed: {e}", emit.event);
                    }
                }
                self.fire(ClientEvent::Connect { namespace });
            }
            PacketType::Disconnect => {
                if self.mux.mark_unjoined(&namespace) {
                    info!("server left namespace {namespace}");
                    self.fire(ClientEvent::NamespaceDisconnect { namespace });
                }
            }
            PacketType::ConnectError => {
                let data = packet.data.unwrap_or(serde_json::Value::Null);
                warn!("namespace {namespace} rejected: {data}");
                if namespace != DEFAULT_NAMESPACE {
                    self.mux.mark_unjoined(&namespace);
                    for emit in self.mux.take_pending(&namespace) {
                        settle_queued(&namespace, emit, AckError::JoinRejected);
                    }
                }
                self.fire(ClientEvent::ConnectError { namespace, data });
            }
            PacketType::Event | PacketType::BinaryEvent => {
                match Event::from_packet(packet, self.commands.clone()) {
                    Some(event) => {
                        self.mux.route(&event);
                    }
                    None => warn!("dropping event without a name on {namespace}"),
                }
            }
            PacketType::Ack | PacketType::BinaryAck => {
                debug!("ack packet reached the callback context on {namespace}");
            }
        }
    }

    /// Fail every queued emit and pending ack with `err`.
    fn cancel_all(&mut self, err: AckError) {
        for (namespace, emit) in self.mux.take_all_pending() {
            settle_queued(&namespace, emit, err.clone());
        }
        let settled = self.acks.lock().reset_with(err);
        for ack in settled {
            ack.invoke();
        }
    }

    fn fire(&mut self, event: ClientEvent) {
        for listener in self.listeners.iter_mut() {
            if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                error!("lifecycle listener panicked on {}", event.name());
            }
        }
        self.dispatcher.dispatch(event);
    }
}

fn settle_queued(namespace: &str, emit: QueuedEmit, err: AckError) {
    if let Some(ack) = emit.ack {
        SettledAck::immediate(namespace, ack.callback, err).invoke();
    }
}

impl Drop for SocketClient {
    fn drop(&mut self) {
        self.policy.cancel();
        if let Some(commands) = self.commands.take() {
            let _ = commands.send(Command::Disconnect);
        }
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
