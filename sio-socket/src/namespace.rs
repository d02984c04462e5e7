//! Namespace multiplexing.
//!
//! Namespace tables live on the callback context only. Each namespace keeps
//! its join flag, its handlers in registration order and a bounded queue of
//! emits waiting for the join to complete.

use std::cell::Cell;
use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};

use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use sio_core::constants::DEFAULT_NAMESPACE;

use crate::ack::AckCallback;
use crate::codec::{Packet, Payload};
use crate::error::{SocketError, SocketResult};
use crate::events::Command;

/// Identifies a registered handler for [`Multiplexer::off`].
pub type HandlerId = u64;

/// User event handler. Errors are logged and do not stop other handlers.
pub type Handler = Box<dyn FnMut(&Event) -> anyhow::Result<()> + 'static>;

/// An inbound event as seen by handlers.
pub struct Event {
    pub namespace: String,
    pub name: String,
    pub payload: Payload,
    ack: Option<AckResponder>,
}

struct AckResponder {
    id: u64,
    sent: Cell<bool>,
    commands: UnboundedSender<Command>,
}

impl Event {
    pub fn new(namespace: &str, name: &str, payload: Payload) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            payload,
            ack: None,
        }
    }

    /// Build an event from a decoded event packet.
    pub(crate) fn from_packet(packet: Packet, commands: Option<UnboundedSender<Command>>) -> Option<Self> {
        let name = packet.event_name()?.to_string();
        let payload = packet.payload();
        let ack = match (packet.ack_id, commands) {
            (Some(id), Some(commands)) => Some(AckResponder {
                id,
                sent: Cell::new(false),
                commands,
            }),
            _ => None,
        };
        Some(Self {
            namespace: packet.namespace,
            name,
            payload,
            ack,
        })
    }

    pub fn args(&self) -> &[serde_json::Value] {
        &self.payload.args
    }

    pub fn arg(&self, index: usize) -> Option<&serde_json::Value> {
        self.payload.args.get(index)
    }

    /// Binary attachment referenced by argument `index`.
    pub fn binary(&self, index: usize) -> Option<&bytes::Bytes> {
        self.payload.binary(index)
    }

    /// Whether the server asked for an acknowledgement.
    pub fn wants_ack(&self) -> bool {
        self.ack.is_some()
    }

    /// Acknowledge the event. Only the first reply is sent.
    pub fn reply(&self, payload: impl Into<Payload>) -> SocketResult<()> {
        let responder = self.ack.as_ref().ok_or(SocketError::AckNotRequested)?;
        if responder.sent.replace(true) {
            return Err(SocketError::AlreadyAcknowledged);
        }
        let packet = Packet::ack(&self.namespace, responder.id, payload.into());
        responder
            .commands
            .send(Command::Send {
                packet,
                generation: None,
            })
            .map_err(|_| SocketError::NotConnected)
    }
}

/// An emit waiting for its namespace to join.
pub(crate) struct QueuedEmit {
    pub event: String,
    pub payload: Payload,
    pub ack: Option<QueuedAck>,
}

/// Continuation of a queued emit. The deadline runs from the emit, not the flush.
pub(crate) struct QueuedAck {
    pub callback: AckCallback,
    pub deadline: Instant,
}

impl QueuedEmit {
    fn expired(&self, now: Instant) -> bool {
        self.ack.as_ref().map(|a| a.deadline <= now).unwrap_or(false)
    }
}

/// One logical channel over the session.
pub struct Namespace {
    name: String,
    joined: bool,
    join_requested: bool,
    handlers: HashMap<String, Vec<(HandlerId, Handler)>>,
    pending: VecDeque<QueuedEmit>,
    dropped: usize,
}

impl Namespace {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            joined: false,
            join_requested: false,
            handlers: HashMap::new(),
            pending: VecDeque::new(),
            dropped: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_joined(&self) -> bool {
        self.joined
    }

    pub fn handler_count(&self, event: &str) -> usize {
        self.handlers.get(event).map(Vec::len).unwrap_or(0)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Emits dropped from this namespace's full queue so far.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Run every handler for `event.name` in registration order; returns how many ran.
    fn dispatch(&mut self, event: &Event) -> usize {
        let Some(handlers) = self.handlers.get_mut(&event.name) else {
            debug!("no handlers for {} on {}", event.name, self.name);
            return 0;
        };
        for (id, handler) in handlers.iter_mut() {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("handler {id} for {} on {} failed: {e:#}", event.name, self.name),
                Err(_) => error!("handler {id} for {} on {} panicked", event.name, self.name),
            }
        }
        handlers.len()
    }
}

/// Namespace table owned by the callback context.
pub struct Multiplexer {
    namespaces: HashMap<String, Namespace>,
    next_handler_id: HandlerId,
    capacity: usize,
}

impl Multiplexer {
    /// `capacity` bounds each namespace's queue of emits awaiting a join.
    pub fn new(capacity: usize) -> Self {
        let mut namespaces = HashMap::new();
        namespaces.insert(DEFAULT_NAMESPACE.to_string(), Namespace::new(DEFAULT_NAMESPACE));
        Self {
            namespaces,
            next_handler_id: 1,
            capacity: capacity.max(1),
        }
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
    }

    pub fn validate_name(name: &str) -> SocketResult<()> {
        if !name.starts_with('/') || name.contains(',') || name.chars().any(char::is_whitespace) {
            return Err(SocketError::InvalidNamespace(name.to_string()));
        }
        Ok(())
    }

    /// Track `name`, creating it if needed. Returns true when newly created.
    pub fn join(&mut self, name: &str) -> SocketResult<bool> {
        Self::validate_name(name)?;
        if self.namespaces.contains_key(name) {
            return Ok(false);
        }
        debug!("tracking namespace {name}");
        self.namespaces.insert(name.to_string(), Namespace::new(name));
        Ok(true)
    }

    /// Forget `name` with its handlers. Queued emits are returned for cancellation.
    pub(crate) fn leave(&mut self, name: &str) -> SocketResult<Option<(bool, Vec<QueuedEmit>)>> {
        if name == DEFAULT_NAMESPACE {
            return Err(SocketError::InvalidNamespace(name.to_string()));
        }
        Ok(self
            .namespaces
            .remove(name)
            .map(|ns| (ns.joined, ns.pending.into_iter().collect())))
    }

    pub fn get(&self, name: &str) -> Option<&Namespace> {
        self.namespaces.get(name)
    }

    pub fn is_joined(&self, name: &str) -> bool {
        self.namespaces.get(name).map(|ns| ns.joined).unwrap_or(false)
    }

    /// Whether `name` is tracked but neither joined nor waiting for a join reply.
    pub fn needs_join(&self, name: &str) -> bool {
        self.namespaces
            .get(name)
            .map(|ns| !ns.joined && !ns.join_requested)
            .unwrap_or(false)
    }

    /// Record that a join request for `name` is on its way to the server.
    pub fn mark_join_requested(&mut self, name: &str) {
        if let Some(ns) = self.namespaces.get_mut(name) {
            ns.join_requested = true;
        }
    }

    /// Tracked namespaces other than `/`, sorted.
    pub fn named(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .namespaces
            .keys()
            .filter(|n| n.as_str() != DEFAULT_NAMESPACE)
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn on(&mut self, namespace: &str, event: &str, handler: Handler) -> SocketResult<HandlerId> {
        self.join(namespace)?;
        let id = self.next_handler_id;
        self.next_handler_id += 1;
        if let Some(ns) = self.namespaces.get_mut(namespace) {
            ns.handlers.entry(event.to_string()).or_default().push((id, handler));
        }
        Ok(id)
    }

    pub fn off(&mut self, namespace: &str, event: &str, id: HandlerId) -> bool {
        let Some(handlers) = self
            .namespaces
            .get_mut(namespace)
            .and_then(|ns| ns.handlers.get_mut(event))
        else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(h, _)| *h != id);
        before != handlers.len()
    }

    /// Deliver an event to its namespace's handlers. Events for unknown or
    /// unjoined namespaces are dropped.
    pub fn route(&mut self, event: &Event) -> bool {
        match self.namespaces.get_mut(&event.namespace) {
            Some(ns) if ns.joined => {
                ns.dispatch(event);
                true
            }
            Some(_) => {
                warn!("dropping {} for unjoined namespace {}", event.name, event.namespace);
                false
            }
            None => {
                warn!("dropping {} for unknown namespace {}", event.name, event.namespace);
                false
            }
        }
    }

    /// Queue an emit until the namespace joins. Returns the oldest emit if the queue overflowed.
    pub(crate) fn enqueue(&mut self, namespace: &str, emit: QueuedEmit) -> SocketResult<Option<QueuedEmit>> {
        self.join(namespace)?;
        let capacity = self.capacity;
        let Some(ns) = self.namespaces.get_mut(namespace) else {
            return Err(SocketError::InvalidNamespace(namespace.to_string()));
        };
        let dropped = if ns.pending.len() >= capacity {
            ns.pending.pop_front()
        } else {
            None
        };
        if let Some(old) = &dropped {
            ns.dropped += 1;
            warn!(
                "join queue for {namespace} is full ({capacity}), dropping oldest emit {}",
                old.event
            );
        }
        ns.pending.push_back(emit);
        Ok(dropped)
    }

    /// Mark `namespace` joined and hand back its queued emits in emit order.
    pub(crate) fn mark_joined(&mut self, namespace: &str) -> Vec<QueuedEmit> {
        match self.namespaces.get_mut(namespace) {
            Some(ns) => {
                ns.joined = true;
                ns.join_requested = false;
                ns.pending.drain(..).collect()
            }
            None => {
                warn!("join confirmation for untracked namespace {namespace}");
                Vec::new()
            }
        }
    }

    /// Returns whether the namespace was joined. A later join asks the server again.
    pub fn mark_unjoined(&mut self, namespace: &str) -> bool {
        self.namespaces
            .get_mut(namespace)
            .map(|ns| {
                ns.join_requested = false;
                std::mem::replace(&mut ns.joined, false)
            })
            .unwrap_or(false)
    }

    pub fn mark_all_unjoined(&mut self) {
        for ns in self.namespaces.values_mut() {
            ns.joined = false;
            ns.join_requested = false;
        }
    }

    /// Remove queued emits whose ack deadline is at or before `now`.
    pub(crate) fn expire_queued(&mut self, now: Instant) -> Vec<(String, QueuedEmit)> {
        let mut out = Vec::new();
        for ns in self.namespaces.values_mut() {
            if !ns.pending.iter().any(|e| e.expired(now)) {
                continue;
            }
            let (expired, kept): (Vec<_>, Vec<_>) = ns.pending.drain(..).partition(|e| e.expired(now));
            ns.pending = kept.into();
            let name = ns.name.clone();
            out.extend(expired.into_iter().map(|e| (name.clone(), e)));
        }
        out
    }

    /// Earliest ack deadline among queued emits.
    pub(crate) fn next_queued_deadline(&self) -> Option<Instant> {
        self.namespaces
            .values()
            .flat_map(|ns| ns.pending.iter())
            .filter_map(|e| e.ack.as_ref().map(|a| a.deadline))
            .min()
    }

    /// Remove the queued emits of one namespace.
    pub(crate) fn take_pending(&mut self, namespace: &str) -> Vec<QueuedEmit> {
        self.namespaces
            .get_mut(namespace)
            .map(|ns| ns.pending.drain(..).collect())
            .unwrap_or_default()
    }

    /// Remove every queued emit.
    pub(crate) fn take_all_pending(&mut self) -> Vec<(String, QueuedEmit)> {
        let mut out = Vec::new();
        for ns in self.namespaces.values_mut() {
            let name = ns.name.clone();
            out.extend(ns.pending.drain(..).map(|e| (name.clone(), e)));
        }
        out
    }
}
