//! Acknowledgement tracking.
//!
//! The tracker is shared between the callback context, which registers acks
//! when an emit is actually written, and the I/O task, which resolves, expires
//! and resets them. Settled acks are handed back as [`SettledAck`] values so
//! the continuation itself always runs on the callback context.

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::codec::Payload;
use crate::error::AckError;

/// First ack id of every session generation.
pub const ACK_ID_BASE: u64 = 1;

/// Continuation invoked once with the ack payload or the reason it never came.
pub type AckCallback = Box<dyn FnOnce(Result<Payload, AckError>) + Send + 'static>;

struct PendingAck {
    namespace: String,
    deadline: Instant,
    callback: AckCallback,
}

/// An acknowledgement whose outcome is known, waiting to be delivered.
pub struct SettledAck {
    pub id: u64,
    pub namespace: String,
    pub result: Result<Payload, AckError>,
    callback: AckCallback,
}

impl SettledAck {
    /// Build a settled ack that never entered the table.
    pub fn immediate(namespace: &str, callback: AckCallback, err: AckError) -> Self {
        Self {
            id: 0,
            namespace: namespace.to_string(),
            result: Err(err),
            callback,
        }
    }

    /// Run the continuation. A panic inside it is logged and swallowed.
    pub fn invoke(self) {
        let SettledAck {
            id,
            namespace,
            result,
            callback,
        } = self;
        if catch_unwind(AssertUnwindSafe(move || callback(result))).is_err() {
            error!("ack callback for id {id} on {namespace} panicked");
        }
    }
}

impl fmt::Debug for SettledAck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettledAck")
            .field("id", &self.id)
            .field("namespace", &self.namespace)
            .field("result", &self.result)
            .finish_non_exhaustive()
    }
}

/// Table of outstanding acknowledgements for one session generation.
pub struct AckTracker {
    next_id: u64,
    generation: u64,
    pending: HashMap<u64, PendingAck>,
}

impl AckTracker {
    pub fn new() -> Self {
        Self {
            next_id: ACK_ID_BASE,
            generation: 0,
            pending: HashMap::new(),
        }
    }

    /// Register a continuation and return the ack id to put on the wire.
    pub fn register(&mut self, namespace: &str, timeout: Duration, callback: AckCallback) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.pending.insert(
            id,
            PendingAck {
                namespace: namespace.to_string(),
                deadline: Instant::now() + timeout,
                callback,
            },
        );
        debug!("registered ack {id} on {namespace} (generation {})", self.generation);
        id
    }

    /// Settle `id` with the server's reply.
    ///
    /// Unknown ids, and replies arriving on a different namespace than the
    /// emit, are a protocol desync: they are logged and ignored.
    pub fn resolve(&mut self, namespace: &str, id: u64, payload: Payload) -> Option<SettledAck> {
        match self.pending.get(&id) {
            Some(pending) if pending.namespace != namespace => {
                warn!(
                    "ignoring ack {id} from {namespace}, it was registered on {}",
                    pending.namespace
                );
                return None;
            }
            Some(_) => {}
            None => {
                warn!("ignoring ack for unknown or expired id {id}");
                return None;
            }
        }
        self.pending.remove(&id).map(|pending| SettledAck {
            id,
            namespace: pending.namespace,
            result: Ok(payload),
            callback: pending.callback,
        })
    }

    /// Settle `id` with an error.
    pub fn fail(&mut self, id: u64, err: AckError) -> Option<SettledAck> {
        self.pending.remove(&id).map(|pending| SettledAck {
            id,
            namespace: pending.namespace,
            result: Err(err),
            callback: pending.callback,
        })
    }

    /// Remove every ack whose deadline is at or before `now`.
    pub fn expire(&mut self, now: Instant) -> Vec<SettledAck> {
        let mut expired: Vec<u64> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        expired.sort_unstable();
        if !expired.is_empty() {
            debug!("{} ack(s) timed out", expired.len());
        }
        expired
            .into_iter()
            .filter_map(|id| self.fail(id, AckError::Timeout))
            .collect()
    }

    /// Earliest outstanding deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.deadline).min()
    }

    /// Start a new generation: every outstanding ack fails with `err` and ids restart at the base.
    pub fn reset_with(&mut self, err: AckError) -> Vec<SettledAck> {
        self.generation += 1;
        self.next_id = ACK_ID_BASE;
        let mut ids: Vec<u64> = self.pending.keys().copied().collect();
        ids.sort_unstable();
        ids.into_iter()
            .filter_map(|id| self.fail(id, err.clone()))
            .collect()
    }

    /// Start a new generation after the transport was lost.
    pub fn reset(&mut self) -> Vec<SettledAck> {
        self.reset_with(AckError::ConnectionReset)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl Default for AckTracker {
    fn default() -> Self {
        Self::new()
    }
}
