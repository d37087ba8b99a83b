//! One attempt at a game-server session: frame extraction, the join
//! handshake, chat exchange, and the in-world keep-alive.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use tokio_util::codec::Decoder;
use tracing::{debug, info, trace, warn};

use terralink_proto::{FrameCodec, Message, ProtoError};

use crate::bridge::BridgeState;
use crate::net::connection::ConnId;
use crate::net::flood::FloodGuard;
use crate::runtime::event::{Event, EventKey, HandlerId, Payload};
use crate::runtime::task::{Coroutine, Resume, Step};
use crate::runtime::Runtime;

/// Broadcast slot: chat from here carries no player name.
const SERVER_SLOT: u8 = 255;

/// Where a session is in the join handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Connect request sent, waiting for approval.
    Connecting,
    /// Slot assigned, player state pushed, waiting for world info.
    Approved,
    /// World known, waiting for the spawn signal.
    WorldInfoKnown,
    /// In-world: chat flows and the heartbeat runs.
    Spawned,
    /// No live session; also the state between reconnect attempts.
    Disconnected,
}

/// State for one connection attempt. A fresh `Session` with a bumped
/// generation is created per dial, so stale timers and heartbeats from
/// a previous attempt cannot touch the new one.
pub struct Session {
    pub(crate) conn: ConnId,
    pub(crate) generation: u64,
    pub(crate) stage: Stage,
    pub(crate) slot: u8,
    pub(crate) spawn_point: (i32, i32),
    pub(crate) world_name: String,
    pub(crate) players: HashMap<u8, String>,
    pub(crate) chat_queue: VecDeque<String>,
    pub(crate) flood: FloodGuard,
    pub(crate) handlers: Vec<HandlerId>,
}

impl Session {
    pub(crate) fn new(conn: ConnId, generation: u64, window: Duration, max_lines: usize) -> Self {
        Self {
            conn,
            generation,
            stage: Stage::Connecting,
            slot: 0,
            spawn_point: (0, 0),
            world_name: String::new(),
            players: HashMap::new(),
            chat_queue: VecDeque::new(),
            flood: FloodGuard::new(window, max_lines),
            handlers: Vec::new(),
        }
    }

    /// Send a chat line, or queue it until the player has spawned.
    /// Spawned-side sends go through the flood guard.
    pub(crate) fn chat(&mut self, rt: &mut Runtime, text: &str) {
        if self.stage != Stage::Spawned {
            trace!(conn = %self.conn, "queueing chat until spawn");
            self.chat_queue.push_back(text.to_string());
            return;
        }
        let conn = self.conn;
        let slot = self.slot;
        let now = rt.now();
        self.flood.send_line(now, text, &mut |line| {
            rt.send(
                conn,
                Message::Chat {
                    slot,
                    color: (255, 255, 255),
                    text: line.to_string(),
                }
                .encode(),
            );
        });
    }
}

/// Actions that must run after the bridge state borrow is released,
/// because they publish events whose handlers borrow it again.
enum Deferred {
    Relay { source: String, text: String },
    Close { reason: String },
    StartHeartbeat { conn: ConnId, generation: u64 },
}

/// Data-arrived handler: extract complete frames, parse them, and
/// publish one message event each. A malformed stream tears down the
/// connection rather than the process.
pub(crate) fn on_data(
    rt: &mut Runtime,
    _state: &Rc<RefCell<BridgeState>>,
    conn: ConnId,
) -> Result<(), crate::error::BridgeError> {
    let Some(mut buf) = rt.take_read_buf(conn) else {
        return Ok(());
    };

    let mut codec = FrameCodec::new();
    let mut messages = Vec::new();
    let fault: Option<ProtoError> = loop {
        match codec.decode(&mut buf) {
            Ok(Some(frame)) => {
                trace!(conn = %conn, kind = frame.kind, len = frame.payload.len(),
                       "frame received");
                match Message::parse(&frame) {
                    Ok(msg) => messages.push(msg),
                    Err(e) => break Some(e),
                }
            }
            Ok(None) => break None,
            Err(e) => break Some(e),
        }
    };
    rt.restore_read_buf(conn, buf);

    if let Some(e) = fault {
        warn!(conn = %conn, error = %e, "malformed frame stream");
        rt.close_connection(conn, &format!("protocol error: {e}"));
        return Ok(());
    }

    for msg in messages {
        if !rt.connection_open(conn) {
            break;
        }
        rt.publish(EventKey::Message(conn), Payload::Message(msg));
    }
    Ok(())
}

/// Message handler: drives the handshake state machine and chat.
pub(crate) fn on_message(
    rt: &mut Runtime,
    state: &Rc<RefCell<BridgeState>>,
    conn: ConnId,
    event: &Event,
) -> Result<(), crate::error::BridgeError> {
    let Some(msg) = event.message() else {
        return Ok(());
    };

    let mut deferred: Vec<Deferred> = Vec::new();
    {
        let mut st = state.borrow_mut();
        let password = st.settings.bridge.password.clone();
        let display_name = st.settings.bridge.display_name.clone();
        let Some(session) = st.session.as_mut().filter(|s| s.conn == conn) else {
            return Ok(());
        };

        match msg {
            Message::RequestPassword => {
                rt.send(conn, Message::SendPassword { password }.encode());
            }
            Message::ConnectionApproved { slot } => {
                if session.stage != Stage::Connecting {
                    trace!(conn = %conn, "ignoring duplicate connection approval");
                    return Ok(());
                }
                let slot = *slot;
                session.slot = slot;
                session.stage = Stage::Approved;
                session.players.insert(slot, display_name.clone());
                debug!(conn = %conn, slot = slot, "connection approved");

                rt.send(
                    conn,
                    Message::PlayerAppearance {
                        slot,
                        name: display_name,
                    }
                    .encode(),
                );
                rt.send(
                    conn,
                    Message::SetLife {
                        slot,
                        current: 0,
                        max: 0,
                    }
                    .encode(),
                );
                rt.send(
                    conn,
                    Message::SetMana {
                        slot,
                        current: 0,
                        max: 0,
                    }
                    .encode(),
                );
                rt.send(conn, Message::SetBuffs { buffs: [0; 10] }.encode());
                for item_slot in 0..60 {
                    rt.send(
                        conn,
                        Message::SetInventorySlot {
                            slot,
                            item_slot,
                            stack: 0,
                            prefix: 0,
                            item: 0,
                        }
                        .encode(),
                    );
                }
                rt.send(conn, Message::RequestWorldInfo.encode());
            }
            Message::WorldInfo { spawn, world_name } => {
                if session.stage != Stage::Approved {
                    trace!(conn = %conn, "ignoring world info out of order");
                    return Ok(());
                }
                session.spawn_point = *spawn;
                session.world_name = world_name.clone();
                session.stage = Stage::WorldInfoKnown;
                debug!(conn = %conn, world = %world_name, "world info received");
                rt.send(conn, Message::RequestTileData { x: -1, y: -1 }.encode());
            }
            Message::Spawn => {
                if session.stage != Stage::WorldInfoKnown {
                    trace!(conn = %conn, "ignoring spawn signal out of order");
                    return Ok(());
                }
                let (x, y) = session.spawn_point;
                rt.send(
                    conn,
                    Message::SpawnPlayer {
                        slot: session.slot,
                        x,
                        y,
                    }
                    .encode(),
                );
                session.stage = Stage::Spawned;
                info!(conn = %conn, world = %session.world_name, "entered world");

                let queued: Vec<String> = session.chat_queue.drain(..).collect();
                for line in queued {
                    session.chat(rt, &line);
                }
                deferred.push(Deferred::StartHeartbeat {
                    conn,
                    generation: session.generation,
                });
            }
            Message::PlayerAppearance { slot, name } => {
                session.players.insert(*slot, name.clone());
            }
            Message::Chat { slot, text, .. } => {
                if *slot == session.slot {
                    // Our own lines come back from the server; relaying
                    // them would echo every outbound message.
                    return Ok(());
                }
                let line = if *slot == SERVER_SLOT {
                    text.clone()
                } else {
                    let name = session
                        .players
                        .get(slot)
                        .cloned()
                        .unwrap_or_else(|| slot.to_string());
                    format!("<{name}> {text}")
                };
                deferred.push(Deferred::Relay {
                    source: format!("+{}", session.world_name),
                    text: line,
                });
            }
            Message::Disconnect { reason } => {
                deferred.push(Deferred::Close {
                    reason: format!("server disconnect: {reason}"),
                });
            }
            Message::StatusBarText { count, text } => {
                trace!(conn = %conn, count = count, text = %text, "world loading");
            }
            Message::Unknown { kind, payload } => {
                trace!(conn = %conn, kind = kind, len = payload.len(),
                       "ignoring unhandled message");
            }
            other => {
                trace!(conn = %conn, kind = other.kind(), "ignoring message");
            }
        }
    }

    for action in deferred {
        match action {
            Deferred::Relay { source, text } => {
                rt.publish(EventKey::RelayFromGame, Payload::Relay { source, text });
            }
            Deferred::Close { reason } => rt.close_connection(conn, &reason),
            Deferred::StartHeartbeat { conn, generation } => {
                let interval = state.borrow().settings.bridge.heartbeat();
                rt.spawn(Box::new(Heartbeat {
                    state: Rc::clone(state),
                    conn,
                    generation,
                    interval,
                }));
            }
        }
    }
    Ok(())
}

/// Connection-closed handler: drop the session, announce the loss, and
/// schedule a redial.
pub(crate) fn on_closed(
    rt: &mut Runtime,
    state: &Rc<RefCell<BridgeState>>,
    conn: ConnId,
    event: &Event,
) -> Result<(), crate::error::BridgeError> {
    let reason = match &event.payload {
        Payload::Closed { reason } => reason.clone(),
        _ => "unknown".to_string(),
    };

    let (handlers, was_spawned, delay) = {
        let mut st = state.borrow_mut();
        if st.session.as_ref().is_none_or(|s| s.conn != conn) {
            return Ok(());
        }
        let session = st.session.take().expect("session checked above");
        let delay = st.settings.bridge.reconnect_delay();
        (session.handlers, session.stage == Stage::Spawned, delay)
    };
    for id in &handlers {
        rt.unsubscribe(id);
    }

    warn!(conn = %conn, reason = %reason, delay = ?delay, "session lost, scheduling redial");
    if was_spawned {
        rt.publish(
            EventKey::RelayFromGame,
            Payload::Relay {
                source: "+bridge".to_string(),
                text: format!("Disconnected from server: {reason}"),
            },
        );
    }
    rt.spawn(Box::new(Redial {
        state: Rc::clone(state),
        delay,
    }));
    Ok(())
}

/// Tick handler: replays flood-parked chat once the window has room.
pub(crate) fn on_tick(
    rt: &mut Runtime,
    state: &Rc<RefCell<BridgeState>>,
) -> Result<(), crate::error::BridgeError> {
    let mut st = state.borrow_mut();
    let Some(session) = st.session.as_mut() else {
        return Ok(());
    };
    if session.stage != Stage::Spawned {
        return Ok(());
    }
    let conn = session.conn;
    let slot = session.slot;
    let now = rt.now();
    session.flood.tick(now, &mut |line| {
        rt.send(
            conn,
            Message::Chat {
                slot,
                color: (255, 255, 255),
                text: line.to_string(),
            }
            .encode(),
        );
    });
    Ok(())
}

/// Keep-alive task: a life report of `0/0` every interval for as long
/// as its session generation remains in-world. Ends itself on any
/// mismatch, so a reconnect never accumulates heartbeats.
pub(crate) struct Heartbeat {
    pub(crate) state: Rc<RefCell<BridgeState>>,
    pub(crate) conn: ConnId,
    pub(crate) generation: u64,
    pub(crate) interval: Duration,
}

impl Coroutine for Heartbeat {
    fn resume(&mut self, rt: &mut Runtime, _input: Resume) -> Step {
        let slot = {
            let st = self.state.borrow();
            match st.session.as_ref() {
                Some(s)
                    if s.conn == self.conn
                        && s.generation == self.generation
                        && s.stage == Stage::Spawned =>
                {
                    s.slot
                }
                _ => return Step::Done,
            }
        };
        rt.send(
            self.conn,
            Message::SetLife {
                slot,
                current: 0,
                max: 0,
            }
            .encode(),
        );
        Step::wait(rt.sleep(self.interval))
    }
}

/// Waits out the reconnect delay, then dials a fresh session.
pub(crate) struct Redial {
    pub(crate) state: Rc<RefCell<BridgeState>>,
    pub(crate) delay: Duration,
}

impl Coroutine for Redial {
    fn resume(&mut self, rt: &mut Runtime, input: Resume) -> Step {
        match input {
            Resume::Start => Step::wait(rt.sleep(self.delay)),
            Resume::Event(_) => {
                crate::bridge::dial(rt, &self.state);
                Step::Done
            }
        }
    }
}
