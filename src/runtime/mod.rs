//! Cooperative, single-threaded event runtime.
//!
//! One [`Runtime`] context owns every shared table — the event bus,
//! the timer queue, the task slots, and the connections — and is passed
//! explicitly to every handler and coroutine. Exactly one logical task
//! runs at a time; concurrency exists only at explicit wait points, so
//! none of this state needs locking.
//!
//! The runtime is deterministic and does no I/O of its own. A host
//! drives it through `tick(now)` and the per-connection data/error
//! entry points, and carries out the [`IoRequest`]s it emits; see
//! [`crate::net::driver`] for the tokio host.

pub mod event;
pub mod task;
pub mod timer;

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tracing::{debug, error, trace, warn};

use crate::error::BridgeError;
use crate::net::connection::{ConnId, Connection};
use event::{Event, EventBus, EventKey, Handler, HandlerId, Payload};
use task::{Coroutine, Resume, Step, TaskId, TaskSlot};
use timer::TimerQueue;

/// Grace period between an uncaught failure and process shutdown,
/// leaving room for in-flight disconnect/cleanup events to run.
pub const FAILURE_GRACE: Duration = Duration::from_millis(100);

/// I/O work the runtime asks its host to carry out.
#[derive(Debug)]
pub enum IoRequest {
    /// Initiate a TCP connection for `conn`.
    Dial {
        /// Connection to dial.
        conn: ConnId,
        /// Remote address.
        addr: SocketAddr,
    },
    /// Flush any `pending` bytes best-effort, then close the socket.
    Close {
        /// Connection to close.
        conn: ConnId,
        /// Outbound bytes still queued at close time.
        pending: Vec<Bytes>,
    },
}

/// Outcome of a scheduler tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Keep running.
    Continue,
    /// An uncaught failure went unobserved and the grace period
    /// elapsed; the host should exit.
    Shutdown,
}

/// The runtime context. See the module docs.
pub struct Runtime {
    bus: EventBus,
    timers: TimerQueue,
    tasks: BTreeMap<TaskId, TaskSlot>,
    conns: BTreeMap<ConnId, Connection>,
    io: Vec<IoRequest>,
    next_conn: u64,
    next_task: u64,
    now: Instant,
    grace: Duration,
    fatal_at: Option<Instant>,
    last_failure: Option<String>,
    raising: bool,
}

impl Runtime {
    /// Create a runtime anchored at the given instant.
    pub fn new(now: Instant) -> Self {
        Self {
            bus: EventBus::new(),
            timers: TimerQueue::new(),
            tasks: BTreeMap::new(),
            conns: BTreeMap::new(),
            io: Vec::new(),
            next_conn: 0,
            next_task: 0,
            now,
            grace: FAILURE_GRACE,
            fatal_at: None,
            last_failure: None,
            raising: false,
        }
    }

    /// The instant of the current (or most recent) tick.
    pub fn now(&self) -> Instant {
        self.now
    }

    // ------------------------------------------------------------------
    // Event bus
    // ------------------------------------------------------------------

    /// Register a plain handler for `key`.
    pub fn subscribe<F>(&mut self, key: EventKey, handler: F) -> HandlerId
    where
        F: Fn(&mut Runtime, &Event) -> Result<(), BridgeError> + 'static,
    {
        self.bus.subscribe(key, std::rc::Rc::new(handler))
    }

    /// Remove a previously registered handler. Safe during delivery;
    /// takes effect for subsequent publishes of the same key.
    pub fn unsubscribe(&mut self, id: &HandlerId) {
        self.bus.unsubscribe(id);
    }

    /// Deliver an event to every registered handler in registration
    /// order, then resume every task awaiting its key. Resumed tasks
    /// may publish further events, which are processed depth-first
    /// within the same tick.
    pub fn publish(&mut self, key: EventKey, payload: Payload) {
        let event = Event { key, payload };
        let handlers: Vec<Handler> = self.bus.snapshot(&event.key);
        for handler in handlers {
            if let Err(e) = handler(self, &event) {
                self.raise_failure(event.key.conn(), e);
            }
        }

        // First match wins: each matching wait is consumed here and the
        // task resumed exactly once with this event.
        let ready: Vec<TaskId> = self
            .tasks
            .iter()
            .filter(|(_, slot)| slot.waiting.contains(&event.key))
            .map(|(id, _)| *id)
            .collect();
        for id in ready {
            self.resume(id, Resume::Event(event.clone()));
        }
    }

    // ------------------------------------------------------------------
    // Tasks and timers
    // ------------------------------------------------------------------

    /// Spawn a coroutine and run it to its first wait point.
    pub fn spawn(&mut self, coro: Box<dyn Coroutine>) -> TaskId {
        let id = TaskId(self.next_task);
        self.next_task += 1;
        self.tasks.insert(
            id,
            TaskSlot {
                coro,
                waiting: task::WaitKeys::new(),
            },
        );
        trace!(task = %id, "task spawned");
        self.resume(id, Resume::Start);
        id
    }

    fn resume(&mut self, id: TaskId, input: Resume) {
        let Some(mut slot) = self.tasks.remove(&id) else {
            return;
        };
        slot.waiting.clear();
        match slot.coro.resume(self, input) {
            Step::Wait(keys) => {
                slot.waiting = keys;
                self.tasks.insert(id, slot);
            }
            Step::Done => trace!(task = %id, "task finished"),
        }
    }

    /// Schedule a wake-up and return its private event key, for use in
    /// a [`Step::Wait`] set.
    pub fn sleep(&mut self, after: Duration) -> EventKey {
        EventKey::Timer(self.timers.schedule(self.now, after))
    }

    /// Number of live (waiting) tasks.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    // ------------------------------------------------------------------
    // Connections
    // ------------------------------------------------------------------

    /// Create a connection and ask the host to dial it.
    pub fn open_connection(&mut self, addr: SocketAddr) -> ConnId {
        let id = ConnId(self.next_conn);
        self.next_conn += 1;
        self.conns.insert(id, Connection::new(id, addr));
        self.io.push(IoRequest::Dial { conn: id, addr });
        debug!(conn = %id, addr = %addr, "dialing");
        id
    }

    /// Whether the connection exists and is open.
    pub fn connection_open(&self, conn: ConnId) -> bool {
        self.conns.get(&conn).is_some_and(|c| c.is_open())
    }

    /// Queue bytes for write-readiness-driven flushing by the host.
    /// Writes to an unknown or closed connection are dropped.
    pub fn send(&mut self, conn: ConnId, bytes: Bytes) {
        match self.conns.get_mut(&conn) {
            Some(c) if c.is_open() => {
                trace!(conn = %conn, len = bytes.len(), "outbound queued");
                c.push_outbound(bytes);
            }
            _ => trace!(conn = %conn, "dropped write to closed connection"),
        }
    }

    /// Close a connection. Idempotent: the `Closed` event is published
    /// exactly once, after which the connection is forgotten and no
    /// further reads or writes happen.
    pub fn close_connection(&mut self, conn: ConnId, reason: &str) {
        let Some(c) = self.conns.get_mut(&conn) else {
            return;
        };
        if !c.is_open() {
            return;
        }
        c.mark_closed();
        let pending = c.drain_outbound();
        self.io.push(IoRequest::Close { conn, pending });
        debug!(conn = %conn, reason = reason, "connection closed");
        self.publish(
            EventKey::Closed(conn),
            Payload::Closed {
                reason: reason.to_string(),
            },
        );
        self.conns.remove(&conn);
    }

    /// Take a connection's read buffer for frame extraction. The
    /// consumer removes complete frames and calls
    /// [`Runtime::restore_read_buf`] with the remainder.
    pub fn take_read_buf(&mut self, conn: ConnId) -> Option<BytesMut> {
        self.conns.get_mut(&conn).map(Connection::take_read_buf)
    }

    /// Put back the unconsumed remainder of a read buffer.
    pub fn restore_read_buf(&mut self, conn: ConnId, buf: BytesMut) {
        if let Some(c) = self.conns.get_mut(&conn) {
            c.restore_read_buf(buf);
        }
    }

    // ------------------------------------------------------------------
    // Host boundary
    // ------------------------------------------------------------------

    /// Bytes arrived from the socket: buffer them and publish the
    /// data-arrived event.
    pub fn on_data(&mut self, conn: ConnId, bytes: &[u8]) {
        match self.conns.get_mut(&conn) {
            Some(c) if c.is_open() => {
                c.extend_read_buf(bytes);
                self.publish(EventKey::Data(conn), Payload::None);
            }
            _ => trace!(conn = %conn, "discarding data for closed connection"),
        }
    }

    /// The peer closed the stream.
    pub fn on_peer_closed(&mut self, conn: ConnId) {
        self.close_connection(conn, "connection closed by peer");
    }

    /// The socket reported an error (including dial failures).
    pub fn on_io_error(&mut self, conn: ConnId, err: std::io::Error) {
        self.close_connection(conn, &format!("socket error: {err}"));
    }

    /// Drain the pending I/O requests for the host to carry out.
    pub fn take_io_requests(&mut self) -> Vec<IoRequest> {
        std::mem::take(&mut self.io)
    }

    /// Drain the outbound queue of a connection.
    pub fn take_outbound(&mut self, conn: ConnId) -> Vec<Bytes> {
        self.conns
            .get_mut(&conn)
            .map(Connection::drain_outbound)
            .unwrap_or_default()
    }

    /// Advance the scheduler: fire elapsed timers in deadline order,
    /// publish the tick event, and check the failure grace deadline.
    pub fn tick(&mut self, now: Instant) -> Control {
        self.now = now;
        for id in self.timers.due(now) {
            self.publish(EventKey::Timer(id), Payload::None);
        }
        self.publish(EventKey::Tick, Payload::None);

        if let Some(at) = self.fatal_at {
            if now >= at {
                error!(
                    reason = self.last_failure.as_deref().unwrap_or("unknown"),
                    "failure grace period elapsed, shutting down"
                );
                return Control::Shutdown;
            }
        }
        Control::Continue
    }

    /// The failure that scheduled shutdown, if any.
    pub fn shutdown_reason(&self) -> Option<&str> {
        self.last_failure.as_deref()
    }

    // ------------------------------------------------------------------
    // Failure policy
    // ------------------------------------------------------------------

    /// Capture an error raised by a handler: tear down the owning
    /// connection if known, publish the failure event, and — when
    /// nothing at all observes failures — schedule process shutdown
    /// after the grace period.
    fn raise_failure(&mut self, conn: Option<ConnId>, err: BridgeError) {
        let reason = err.to_string();
        warn!(conn = ?conn, error = %reason, "unhandled handler failure");

        if self.raising {
            // A failure handler failed in turn; stop recursing.
            self.last_failure = Some(reason);
            self.fatal_at.get_or_insert(self.now + self.grace);
            return;
        }

        if let Some(c) = conn {
            self.close_connection(c, "handler failure");
        }

        let observed = self.bus.has_handlers(&EventKey::Failure)
            || self
                .tasks
                .values()
                .any(|slot| slot.waiting.contains(&EventKey::Failure));

        self.raising = true;
        self.publish(
            EventKey::Failure,
            Payload::Failure {
                conn,
                reason: reason.clone(),
            },
        );
        self.raising = false;

        if !observed {
            self.last_failure = Some(reason);
            self.fatal_at.get_or_insert(self.now + self.grace);
        }
    }
}
