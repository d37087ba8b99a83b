//! The chat bridge: owns the session lifecycle and relays chat in both
//! directions between the runtime's relay events and the game server.
//!
//! Inbound game chat is published as [`EventKey::RelayFromGame`] with a
//! `+world` source tag; anything published as
//! [`EventKey::RelayToGame`] is split to the game's chat length limit
//! and sent in-world.

pub mod session;

use std::cell::RefCell;
use std::rc::Rc;

use tracing::info;

use terralink_proto::{Message, MAX_CHAT_LEN};

use crate::config::Config;
use crate::net::flood::floor_char_boundary;
use crate::runtime::event::{EventKey, Payload};
use crate::runtime::Runtime;
use session::{Session, Stage};

/// Shared mutable bridge state, captured by every handler closure.
pub(crate) struct BridgeState {
    pub(crate) settings: Config,
    pub(crate) session: Option<Session>,
    pub(crate) next_generation: u64,
}

/// Handle to the installed bridge.
pub struct Bridge {
    state: Rc<RefCell<BridgeState>>,
}

impl Bridge {
    /// Install the bridge on a runtime: registers the outbound relay
    /// and scheduler-tick handlers. Call [`Bridge::dial`] to start the
    /// first session.
    pub fn install(rt: &mut Runtime, config: Config) -> Self {
        let state = Rc::new(RefCell::new(BridgeState {
            settings: config,
            session: None,
            next_generation: 0,
        }));

        {
            let state = Rc::clone(&state);
            rt.subscribe(EventKey::RelayToGame, move |rt, ev| {
                if let Payload::Relay { source, text } = &ev.payload {
                    relay_to_game(rt, &state, source, text);
                }
                Ok(())
            });
        }
        {
            let state = Rc::clone(&state);
            rt.subscribe(EventKey::Tick, move |rt, _| session::on_tick(rt, &state));
        }

        Self { state }
    }

    /// Open a session to the configured server.
    pub fn dial(&self, rt: &mut Runtime) {
        dial(rt, &self.state);
    }

    /// Current handshake stage; [`Stage::Disconnected`] between
    /// sessions.
    pub fn stage(&self) -> Stage {
        self.state
            .borrow()
            .session
            .as_ref()
            .map_or(Stage::Disconnected, |s| s.stage)
    }

    /// Snapshot of the known slot-to-name roster.
    pub fn players(&self) -> Vec<(u8, String)> {
        let mut roster: Vec<(u8, String)> = self
            .state
            .borrow()
            .session
            .as_ref()
            .map(|s| s.players.iter().map(|(k, v)| (*k, v.clone())).collect())
            .unwrap_or_default();
        roster.sort_by_key(|(slot, _)| *slot);
        roster
    }

    /// Name of the world the bridge is in, once known.
    pub fn world_name(&self) -> Option<String> {
        self.state
            .borrow()
            .session
            .as_ref()
            .filter(|s| !s.world_name.is_empty())
            .map(|s| s.world_name.clone())
    }
}

/// Open a connection, register its session handlers, and send the
/// connect request. Each call creates a fresh generation so handlers
/// and timers from an earlier attempt cannot act on the new session.
pub(crate) fn dial(rt: &mut Runtime, state: &Rc<RefCell<BridgeState>>) {
    let (addr, version, window, max_lines, generation) = {
        let mut st = state.borrow_mut();
        st.next_generation += 1;
        (
            st.settings.server.address,
            st.settings.bridge.version.clone(),
            st.settings.flood.window(),
            st.settings.flood.max_lines,
            st.next_generation,
        )
    };

    let conn = rt.open_connection(addr);
    info!(conn = %conn, addr = %addr, generation = generation, "connecting to game server");
    let mut session = Session::new(conn, generation, window, max_lines);

    {
        let state = Rc::clone(state);
        session.handlers.push(rt.subscribe(
            EventKey::Data(conn),
            move |rt, _| session::on_data(rt, &state, conn),
        ));
    }
    {
        let state = Rc::clone(state);
        session.handlers.push(rt.subscribe(
            EventKey::Message(conn),
            move |rt, ev| session::on_message(rt, &state, conn, ev),
        ));
    }
    {
        let state = Rc::clone(state);
        session.handlers.push(rt.subscribe(
            EventKey::Closed(conn),
            move |rt, ev| session::on_closed(rt, &state, conn, ev),
        ));
    }

    state.borrow_mut().session = Some(session);
    rt.send(conn, Message::ConnectRequest { version }.encode());
}

/// Relay a line into the game, splitting it to fit the in-game chat
/// limit. The budget leaves room for the server prefixing our own
/// display name onto every line it echoes.
fn relay_to_game(rt: &mut Runtime, state: &Rc<RefCell<BridgeState>>, source: &str, text: &str) {
    let mut st = state.borrow_mut();
    let budget = MAX_CHAT_LEN.saturating_sub(st.settings.bridge.display_name.len() + 3);
    let Some(session) = st.session.as_mut() else {
        tracing::trace!(source = %source, "no session, dropping relay line");
        return;
    };
    for piece in split_chat(&format!("<{source}> {text}"), budget) {
        session.chat(rt, &piece);
    }
}

/// Split `text` into pieces no longer than `limit` bytes, marking each
/// break with an ellipsis on both sides of the cut.
fn split_chat(text: &str, limit: usize) -> Vec<String> {
    // Floor of 11 keeps the loop advancing: the cut point `limit - 3`
    // then sits at least one maximal 4-byte char past the 3-byte
    // continuation prefix, so some char boundary strictly after the
    // prefix always exists and `rest` shrinks every iteration.
    let limit = limit.max(11);
    let mut pieces = Vec::new();
    let mut rest = text.to_string();
    while rest.len() > limit {
        let cut = floor_char_boundary(&rest, limit - 3);
        pieces.push(format!("{}...", &rest[..cut]));
        rest = format!("...{}", &rest[cut..]);
    }
    pieces.push(rest);
    pieces
}
