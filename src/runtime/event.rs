//! Event keys, payloads, and the publish/subscribe registry.
//!
//! Keys are a closed enum: simple tags plus composite keys carrying the
//! connection or timer they concern, so a handler can subscribe to
//! "data arrived on connection X" rather than all data events. Each key
//! family has exactly one payload shape, chosen at the publish site.

use std::collections::HashMap;
use std::rc::Rc;

use crate::error::BridgeError;
use crate::net::connection::ConnId;
use crate::runtime::timer::TimerId;
use crate::runtime::Runtime;
use terralink_proto::Message;

/// Identifier routing a published event to subscribers and waiters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKey {
    /// Bytes were appended to a connection's read buffer.
    Data(ConnId),
    /// A decoded protocol message arrived on a connection.
    Message(ConnId),
    /// A connection reached its terminal state.
    Closed(ConnId),
    /// A scheduled deadline elapsed.
    Timer(TimerId),
    /// The scheduler completed a tick.
    Tick,
    /// A handler failed and the bus captured it.
    Failure,
    /// Chat heading from the collaborator side into the game world.
    RelayToGame,
    /// Chat heading from the game world to the collaborator side.
    RelayFromGame,
}

impl EventKey {
    /// The connection this key concerns, if any.
    pub fn conn(&self) -> Option<ConnId> {
        match self {
            Self::Data(c) | Self::Message(c) | Self::Closed(c) => Some(*c),
            _ => None,
        }
    }
}

/// Event payload; one variant per key family.
#[derive(Debug, Clone)]
pub enum Payload {
    /// No payload (`Timer`, `Tick`).
    None,
    /// A decoded protocol message (`Message`).
    Message(Message),
    /// Close notification with a human-readable reason (`Closed`).
    Closed {
        /// Why the connection ended.
        reason: String,
    },
    /// Captured handler failure (`Failure`).
    Failure {
        /// Origin connection, when identifiable from the event key.
        conn: Option<ConnId>,
        /// Rendered error.
        reason: String,
    },
    /// Relayed chat line (`RelayToGame`, `RelayFromGame`).
    Relay {
        /// Where the line came from (e.g. `+WorldName`).
        source: String,
        /// The chat text.
        text: String,
    },
}

/// A published event: key plus payload.
#[derive(Debug, Clone)]
pub struct Event {
    /// Routing key.
    pub key: EventKey,
    /// Payload matching the key family.
    pub payload: Payload,
}

impl Event {
    /// The protocol message, if this is a `Message` event.
    pub fn message(&self) -> Option<&Message> {
        match &self.payload {
            Payload::Message(msg) => Some(msg),
            _ => None,
        }
    }
}

/// A plain event handler. Runs synchronously to completion; logic that
/// must block on further events is spawned as a
/// [`Coroutine`](crate::runtime::task::Coroutine) instead.
pub type Handler = Rc<dyn Fn(&mut Runtime, &Event) -> Result<(), BridgeError>>;

/// Token identifying one subscription, for later removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerId {
    key: EventKey,
    seq: u64,
}

/// Ordered handler registry.
///
/// Delivery iterates a snapshot of the registration list, so removing a
/// handler during delivery of its own key takes effect for subsequent
/// publishes only; removal for a *different* key is immediate.
#[derive(Default)]
pub struct EventBus {
    handlers: HashMap<EventKey, Vec<(u64, Handler)>>,
    next_seq: u64,
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `key`, after all existing handlers.
    pub fn subscribe(&mut self, key: EventKey, handler: Handler) -> HandlerId {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.handlers.entry(key).or_default().push((seq, handler));
        HandlerId { key, seq }
    }

    /// Remove a previously registered handler.
    pub fn unsubscribe(&mut self, id: &HandlerId) {
        if let Some(list) = self.handlers.get_mut(&id.key) {
            list.retain(|(seq, _)| *seq != id.seq);
            if list.is_empty() {
                self.handlers.remove(&id.key);
            }
        }
    }

    /// Snapshot of the handlers for `key`, in registration order.
    pub fn snapshot(&self, key: &EventKey) -> Vec<Handler> {
        self.handlers
            .get(key)
            .map(|list| list.iter().map(|(_, h)| Rc::clone(h)).collect())
            .unwrap_or_default()
    }

    /// Whether any handler is registered for `key`.
    pub fn has_handlers(&self, key: &EventKey) -> bool {
        self.handlers.get(key).is_some_and(|list| !list.is_empty())
    }
}
