//! End-to-end bridge behavior against a scripted server, with no
//! sockets involved: server bytes go in through `on_data`, client
//! bytes come out of the outbound queue, and time is synthetic.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tokio_util::codec::Decoder;

use terralink::bridge::session::Stage;
use terralink::config::{BridgeConfig, Config, FloodConfig, ServerConfig};
use terralink::net::ConnId;
use terralink::runtime::event::{EventKey, Payload};
use terralink::runtime::{Control, IoRequest, Runtime};
use terralink::Bridge;
use terralink_proto::{Frame, FrameCodec, Message};

fn test_config() -> Config {
    Config {
        server: ServerConfig {
            address: "127.0.0.1:7777".parse().expect("valid address"),
        },
        bridge: BridgeConfig::default(),
        flood: FloodConfig::default(),
    }
}

fn dial_request(rt: &mut Runtime) -> ConnId {
    rt.take_io_requests()
        .into_iter()
        .find_map(|req| match req {
            IoRequest::Dial { conn, .. } => Some(conn),
            _ => None,
        })
        .expect("bridge should request a dial")
}

fn feed(rt: &mut Runtime, conn: ConnId, msg: Message) {
    rt.on_data(conn, &msg.encode());
}

fn drain_frames(rt: &mut Runtime, conn: ConnId) -> Vec<Frame> {
    let mut buf = BytesMut::new();
    for chunk in rt.take_outbound(conn) {
        buf.extend_from_slice(&chunk);
    }
    let mut codec = FrameCodec::new();
    let mut frames = Vec::new();
    while let Some(frame) = codec.decode(&mut buf).expect("well-formed outbound") {
        frames.push(frame);
    }
    assert!(buf.is_empty(), "outbound ends on a frame boundary");
    frames
}

fn chat_texts(frames: &[Frame]) -> Vec<String> {
    frames
        .iter()
        .filter(|f| f.kind == 0x19)
        .map(|f| match Message::parse(f).expect("valid chat") {
            Message::Chat { text, .. } => text,
            other => panic!("expected chat, got 0x{:02x}", other.kind()),
        })
        .collect()
}

/// Drive a session through the full four-stage handshake.
fn join_world(rt: &mut Runtime, conn: ConnId, slot: u8) {
    feed(rt, conn, Message::ConnectionApproved { slot });
    feed(
        rt,
        conn,
        Message::WorldInfo {
            spawn: (10, 20),
            world_name: "Foo".to_string(),
        },
    );
    feed(rt, conn, Message::Spawn);
}

#[test]
fn test_dial_sends_connect_request() {
    let mut rt = Runtime::new(Instant::now());
    let bridge = Bridge::install(&mut rt, test_config());
    bridge.dial(&mut rt);

    let conn = dial_request(&mut rt);
    let frames = drain_frames(&mut rt, conn);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].kind, 0x01);
    assert_eq!(&frames[0].payload[..], b"Terraria71");
    assert_eq!(bridge.stage(), Stage::Connecting);
}

#[test]
fn test_password_challenge_answered_from_config() {
    let mut rt = Runtime::new(Instant::now());
    let mut config = test_config();
    config.bridge.password = "hunter2".to_string();
    let bridge = Bridge::install(&mut rt, config);
    bridge.dial(&mut rt);
    let conn = dial_request(&mut rt);
    drain_frames(&mut rt, conn);

    feed(&mut rt, conn, Message::RequestPassword);
    let frames = drain_frames(&mut rt, conn);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].kind, 0x26);
    assert_eq!(&frames[0].payload[..], b"hunter2");
}

#[test]
fn test_approval_pushes_player_state_then_requests_world() {
    let mut rt = Runtime::new(Instant::now());
    let bridge = Bridge::install(&mut rt, test_config());
    bridge.dial(&mut rt);
    let conn = dial_request(&mut rt);
    drain_frames(&mut rt, conn);

    feed(&mut rt, conn, Message::ConnectionApproved { slot: 3 });
    let kinds: Vec<u8> = drain_frames(&mut rt, conn).iter().map(|f| f.kind).collect();

    let mut expected = vec![0x04, 0x10, 0x2A, 0x32];
    expected.extend(std::iter::repeat(0x05).take(60));
    expected.push(0x06);
    assert_eq!(kinds, expected);
    assert_eq!(bridge.stage(), Stage::Approved);
}

#[test]
fn test_world_info_triggers_tile_request() {
    let mut rt = Runtime::new(Instant::now());
    let bridge = Bridge::install(&mut rt, test_config());
    bridge.dial(&mut rt);
    let conn = dial_request(&mut rt);

    feed(&mut rt, conn, Message::ConnectionApproved { slot: 3 });
    drain_frames(&mut rt, conn);
    feed(
        &mut rt,
        conn,
        Message::WorldInfo {
            spawn: (10, 20),
            world_name: "Foo".to_string(),
        },
    );

    let frames = drain_frames(&mut rt, conn);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].kind, 0x08);
    // (-1, -1) asks for the initial section.
    assert_eq!(&frames[0].payload[..], &(-1i32).to_le_bytes().repeat(2)[..]);
    assert_eq!(bridge.stage(), Stage::WorldInfoKnown);
    assert_eq!(bridge.world_name().as_deref(), Some("Foo"));
}

#[test]
fn test_spawn_signal_spawns_player_and_starts_heartbeat() {
    let mut rt = Runtime::new(Instant::now());
    let bridge = Bridge::install(&mut rt, test_config());
    bridge.dial(&mut rt);
    let conn = dial_request(&mut rt);
    join_world(&mut rt, conn, 3);

    let frames = drain_frames(&mut rt, conn);
    let spawn = frames
        .iter()
        .find(|f| f.kind == 0x0C)
        .expect("spawn-player sent");
    assert_eq!(spawn.payload[0], 3);
    assert_eq!(&spawn.payload[1..5], &10i32.to_le_bytes());
    assert_eq!(&spawn.payload[5..9], &20i32.to_le_bytes());

    // The keep-alive starts immediately: life 0/0 from our slot.
    let life = frames
        .iter()
        .rev()
        .find(|f| f.kind == 0x10)
        .expect("heartbeat sent");
    assert_eq!(&life.payload[..], &[3, 0, 0, 0, 0, 0, 0, 0, 0]);
    assert_eq!(bridge.stage(), Stage::Spawned);
}

#[test]
fn test_spawn_signal_out_of_order_is_ignored() {
    let mut rt = Runtime::new(Instant::now());
    let bridge = Bridge::install(&mut rt, test_config());
    bridge.dial(&mut rt);
    let conn = dial_request(&mut rt);
    drain_frames(&mut rt, conn);

    feed(&mut rt, conn, Message::Spawn);
    assert!(drain_frames(&mut rt, conn).is_empty());
    assert_eq!(bridge.stage(), Stage::Connecting);
}

#[test]
fn test_world_info_before_approval_is_ignored() {
    let mut rt = Runtime::new(Instant::now());
    let bridge = Bridge::install(&mut rt, test_config());
    bridge.dial(&mut rt);
    let conn = dial_request(&mut rt);
    drain_frames(&mut rt, conn);

    feed(
        &mut rt,
        conn,
        Message::WorldInfo {
            spawn: (10, 20),
            world_name: "Foo".to_string(),
        },
    );
    assert!(drain_frames(&mut rt, conn).is_empty());
    assert_eq!(bridge.stage(), Stage::Connecting);
    assert_eq!(bridge.world_name(), None);
}

#[test]
fn test_duplicate_approval_is_ignored() {
    let mut rt = Runtime::new(Instant::now());
    let bridge = Bridge::install(&mut rt, test_config());
    bridge.dial(&mut rt);
    let conn = dial_request(&mut rt);

    feed(&mut rt, conn, Message::ConnectionApproved { slot: 3 });
    drain_frames(&mut rt, conn);

    feed(&mut rt, conn, Message::ConnectionApproved { slot: 9 });
    assert!(drain_frames(&mut rt, conn).is_empty());
    assert_eq!(bridge.stage(), Stage::Approved);

    // The slot assigned first sticks for the rest of the handshake.
    feed(
        &mut rt,
        conn,
        Message::WorldInfo {
            spawn: (10, 20),
            world_name: "Foo".to_string(),
        },
    );
    drain_frames(&mut rt, conn);
    feed(&mut rt, conn, Message::Spawn);
    let frames = drain_frames(&mut rt, conn);
    let spawn = frames
        .iter()
        .find(|f| f.kind == 0x0C)
        .expect("spawn-player sent");
    assert_eq!(spawn.payload[0], 3);
}

#[test]
fn test_chat_before_spawn_is_queued_and_flushed_in_order() {
    let mut rt = Runtime::new(Instant::now());
    let bridge = Bridge::install(&mut rt, test_config());
    bridge.dial(&mut rt);
    let conn = dial_request(&mut rt);

    rt.publish(
        EventKey::RelayToGame,
        Payload::Relay {
            source: "alice".to_string(),
            text: "first".to_string(),
        },
    );
    rt.publish(
        EventKey::RelayToGame,
        Payload::Relay {
            source: "bob".to_string(),
            text: "second".to_string(),
        },
    );
    assert!(chat_texts(&drain_frames(&mut rt, conn)).is_empty());

    join_world(&mut rt, conn, 3);
    let frames = drain_frames(&mut rt, conn);
    assert_eq!(chat_texts(&frames), vec!["<alice> first", "<bob> second"]);

    // The flush comes right after the spawn-player message.
    let spawn_at = frames.iter().position(|f| f.kind == 0x0C).expect("spawn");
    let chat_at = frames.iter().position(|f| f.kind == 0x19).expect("chat");
    assert!(spawn_at < chat_at);
}

#[test]
fn test_heartbeat_fires_once_per_interval() {
    let start = Instant::now();
    let mut rt = Runtime::new(start);
    let bridge = Bridge::install(&mut rt, test_config());
    bridge.dial(&mut rt);
    let conn = dial_request(&mut rt);
    join_world(&mut rt, conn, 3);
    drain_frames(&mut rt, conn);

    let count_life = |frames: &[Frame]| frames.iter().filter(|f| f.kind == 0x10).count();

    rt.tick(start + Duration::from_secs(1));
    assert_eq!(count_life(&drain_frames(&mut rt, conn)), 1);

    // Sub-interval tick: nothing due.
    rt.tick(start + Duration::from_millis(1500));
    assert_eq!(count_life(&drain_frames(&mut rt, conn)), 0);

    rt.tick(start + Duration::from_secs(2));
    assert_eq!(count_life(&drain_frames(&mut rt, conn)), 1);
}

#[test]
fn test_game_chat_relayed_with_world_tag() {
    let mut rt = Runtime::new(Instant::now());
    let relayed = Rc::new(RefCell::new(Vec::new()));
    {
        let relayed = Rc::clone(&relayed);
        rt.subscribe(EventKey::RelayFromGame, move |_, ev| {
            if let Payload::Relay { source, text } = &ev.payload {
                relayed.borrow_mut().push((source.clone(), text.clone()));
            }
            Ok(())
        });
    }
    let bridge = Bridge::install(&mut rt, test_config());
    bridge.dial(&mut rt);
    let conn = dial_request(&mut rt);
    join_world(&mut rt, conn, 3);

    feed(
        &mut rt,
        conn,
        Message::PlayerAppearance {
            slot: 5,
            name: "bob".to_string(),
        },
    );
    feed(
        &mut rt,
        conn,
        Message::Chat {
            slot: 5,
            color: (255, 240, 20),
            text: "hello".to_string(),
        },
    );
    // Broadcasts from the server slot carry no player name.
    feed(
        &mut rt,
        conn,
        Message::Chat {
            slot: 255,
            color: (255, 255, 255),
            text: "bob has joined.".to_string(),
        },
    );
    // A never-announced slot falls back to its number.
    feed(
        &mut rt,
        conn,
        Message::Chat {
            slot: 9,
            color: (255, 255, 255),
            text: "hi".to_string(),
        },
    );

    assert_eq!(
        *relayed.borrow(),
        vec![
            ("+Foo".to_string(), "<bob> hello".to_string()),
            ("+Foo".to_string(), "bob has joined.".to_string()),
            ("+Foo".to_string(), "<9> hi".to_string()),
        ]
    );
    // Roster tracks our own slot plus every announced appearance.
    assert_eq!(
        bridge.players(),
        vec![(3, "terralink".to_string()), (5, "bob".to_string())]
    );
}

#[test]
fn test_long_relay_line_is_split_within_chat_limit() {
    let mut rt = Runtime::new(Instant::now());
    let bridge = Bridge::install(&mut rt, test_config());
    bridge.dial(&mut rt);
    let conn = dial_request(&mut rt);
    join_world(&mut rt, conn, 3);
    drain_frames(&mut rt, conn);

    let long = "x".repeat(200);
    rt.publish(
        EventKey::RelayToGame,
        Payload::Relay {
            source: "alice".to_string(),
            text: long.clone(),
        },
    );

    // 80 minus room for the server echoing "<terralink> ".
    let budget = 80 - "terralink".len() - 3;
    let texts = chat_texts(&drain_frames(&mut rt, conn));
    assert!(texts.len() > 1);
    assert!(texts.iter().all(|t| t.len() <= budget));
    assert!(texts[0].starts_with("<alice> "));
    assert!(texts[0].ends_with("..."));
    assert!(texts.last().expect("pieces").starts_with("..."));

    let rejoined: String = texts
        .iter()
        .map(|t| t.trim_start_matches("...").trim_end_matches("..."))
        .collect();
    assert_eq!(rejoined, format!("<alice> {long}"));
}

#[test]
fn test_chat_burst_is_rate_limited_then_replayed() {
    let start = Instant::now();
    let mut rt = Runtime::new(start);
    let bridge = Bridge::install(&mut rt, test_config());
    bridge.dial(&mut rt);
    let conn = dial_request(&mut rt);
    join_world(&mut rt, conn, 3);
    drain_frames(&mut rt, conn);

    for n in 0..15 {
        rt.publish(
            EventKey::RelayToGame,
            Payload::Relay {
                source: "alice".to_string(),
                text: format!("line {n}"),
            },
        );
    }
    assert_eq!(chat_texts(&drain_frames(&mut rt, conn)).len(), 10);

    // Still inside the nine-second window: nothing replays.
    rt.tick(start + Duration::from_secs(1));
    assert_eq!(chat_texts(&drain_frames(&mut rt, conn)).len(), 0);

    rt.tick(start + Duration::from_secs(10));
    let texts = chat_texts(&drain_frames(&mut rt, conn));
    assert_eq!(texts.len(), 5);
    assert_eq!(texts[0], "<alice> line 10");
    assert_eq!(texts[4], "<alice> line 14");
}

#[test]
fn test_server_disconnect_schedules_single_redial() {
    let start = Instant::now();
    let mut rt = Runtime::new(start);
    let relayed = Rc::new(RefCell::new(Vec::new()));
    {
        let relayed = Rc::clone(&relayed);
        rt.subscribe(EventKey::RelayFromGame, move |_, ev| {
            if let Payload::Relay { text, .. } = &ev.payload {
                relayed.borrow_mut().push(text.clone());
            }
            Ok(())
        });
    }
    let bridge = Bridge::install(&mut rt, test_config());
    bridge.dial(&mut rt);
    let first = dial_request(&mut rt);
    join_world(&mut rt, first, 3);

    feed(
        &mut rt,
        first,
        Message::Disconnect {
            reason: "bye".to_string(),
        },
    );
    assert_eq!(bridge.stage(), Stage::Disconnected);
    assert!(relayed
        .borrow()
        .iter()
        .any(|t| t.contains("Disconnected from server")));

    // Not yet: the reconnect delay is ten seconds.
    rt.take_io_requests();
    rt.tick(start + Duration::from_secs(9));
    assert!(rt.take_io_requests().is_empty());

    rt.tick(start + Duration::from_secs(10));
    let second = dial_request(&mut rt);
    assert_ne!(first, second);
    assert_eq!(bridge.stage(), Stage::Connecting);

    // The fresh session runs its own handshake from scratch: new slot,
    // no stale player map.
    feed(&mut rt, second, Message::ConnectionApproved { slot: 7 });
    assert_eq!(bridge.stage(), Stage::Approved);
    assert_eq!(bridge.players(), vec![(7, "terralink".to_string())]);

    // Only one redial was scheduled.
    rt.tick(start + Duration::from_secs(25));
    assert!(rt.take_io_requests().is_empty());
}

#[test]
fn test_malformed_stream_closes_connection_not_process() {
    let start = Instant::now();
    let mut rt = Runtime::new(start);
    let bridge = Bridge::install(&mut rt, test_config());
    bridge.dial(&mut rt);
    let conn = dial_request(&mut rt);

    // Connection-approved with an empty payload is truncated.
    rt.on_data(conn, &Frame::new(0x03, Bytes::new()).encode());

    assert_eq!(bridge.stage(), Stage::Disconnected);
    assert!(!rt.connection_open(conn));
    // The fault is scoped to the connection; the process keeps running.
    assert_eq!(rt.tick(start + Duration::from_secs(1)), Control::Continue);
    // And recovery is the normal reconnect path.
    rt.take_io_requests();
    rt.tick(start + Duration::from_secs(11));
    dial_request(&mut rt);
}

#[test]
fn test_partial_frames_reassemble_across_reads() {
    let mut rt = Runtime::new(Instant::now());
    let bridge = Bridge::install(&mut rt, test_config());
    bridge.dial(&mut rt);
    let conn = dial_request(&mut rt);
    drain_frames(&mut rt, conn);

    let wire = Message::ConnectionApproved { slot: 3 }.encode();
    let (head, tail) = wire.split_at(3);
    rt.on_data(conn, head);
    assert!(drain_frames(&mut rt, conn).is_empty());
    assert_eq!(bridge.stage(), Stage::Connecting);

    rt.on_data(conn, tail);
    assert_eq!(bridge.stage(), Stage::Approved);
}
