//! Typed protocol messages.
//!
//! One concrete variant per wire type, with fixed byte offsets matching
//! the classic game protocol. [`Message::parse`] recognizes the inbound
//! set a bridge client cares about; every other type byte parses to
//! [`Message::Unknown`] and is never an error, so newer servers keep
//! working. [`Message::to_frame`] encodes every variant.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{ProtoError, Result};
use crate::frame::Frame;

/// Maximum chat line length the game client renders.
///
/// Longer relay text must be split by the caller before reaching
/// [`Message::Chat`].
pub const MAX_CHAT_LEN: usize = 80;

/// Offset of the player name within a player-appearance payload (the
/// slot byte plus 24 bytes of appearance data precede it).
const APPEARANCE_NAME_OFFSET: usize = 25;

/// Offsets within a world-information payload.
const WORLD_SPAWN_OFFSET: usize = 15;
const WORLD_NAME_OFFSET: usize = 36;

/// A decoded (or to-be-encoded) protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// 0x01 — client hello carrying the protocol version string.
    ConnectRequest {
        /// Version string, e.g. `"Terraria71"`.
        version: String,
    },
    /// 0x02 — server is dropping the connection.
    Disconnect {
        /// Human-readable reason.
        reason: String,
    },
    /// 0x03 — server accepted the connection and assigned a player slot.
    ConnectionApproved {
        /// Assigned player slot.
        slot: u8,
    },
    /// 0x04 — player appearance, carrying the display name.
    PlayerAppearance {
        /// Player slot.
        slot: u8,
        /// Display name.
        name: String,
    },
    /// 0x05 — set one inventory slot.
    SetInventorySlot {
        /// Player slot.
        slot: u8,
        /// Inventory slot index.
        item_slot: u8,
        /// Stack size.
        stack: u8,
        /// Item prefix.
        prefix: u8,
        /// Item id.
        item: i16,
    },
    /// 0x06 — request world information.
    RequestWorldInfo,
    /// 0x07 — world information.
    WorldInfo {
        /// World spawn point in tile coordinates.
        spawn: (i32, i32),
        /// World name.
        world_name: String,
    },
    /// 0x08 — request tile data around a point; `(-1, -1)` asks for the
    /// initial section.
    RequestTileData {
        /// Tile X, or -1.
        x: i32,
        /// Tile Y, or -1.
        y: i32,
    },
    /// 0x09 — status bar text shown during world loading.
    StatusBarText {
        /// Remaining item count.
        count: i32,
        /// Status text.
        text: String,
    },
    /// 0x0C — spawn the player at the given coordinates.
    SpawnPlayer {
        /// Player slot.
        slot: u8,
        /// Spawn X.
        x: i32,
        /// Spawn Y.
        y: i32,
    },
    /// 0x10 — set player life; `0/0` doubles as the keep-alive.
    SetLife {
        /// Player slot.
        slot: u8,
        /// Current life.
        current: i32,
        /// Maximum life.
        max: i32,
    },
    /// 0x19 — chat line.
    Chat {
        /// Originating slot; 255 is a server-origin broadcast.
        slot: u8,
        /// RGB text color.
        color: (u8, u8, u8),
        /// Chat text.
        text: String,
    },
    /// 0x25 — server asks for the connection password.
    RequestPassword,
    /// 0x26 — password reply.
    SendPassword {
        /// Configured server password.
        password: String,
    },
    /// 0x2A — set player mana.
    SetMana {
        /// Player slot.
        slot: u8,
        /// Current mana.
        current: i32,
        /// Maximum mana.
        max: i32,
    },
    /// 0x31 — server signals the client may spawn.
    Spawn,
    /// 0x32 — set the ten player buff slots.
    SetBuffs {
        /// Buff ids, zero for empty.
        buffs: [u8; 10],
    },
    /// Any type byte outside the recognized inbound set.
    Unknown {
        /// Raw type byte.
        kind: u8,
        /// Raw payload, kept for tracing.
        payload: Bytes,
    },
}

fn require(payload: &[u8], need: usize, kind: &'static str) -> Result<()> {
    if payload.len() < need {
        return Err(ProtoError::Truncated {
            kind,
            len: payload.len(),
        });
    }
    Ok(())
}

fn i32_at(payload: &[u8], offset: usize) -> i32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&payload[offset..offset + 4]);
    i32::from_le_bytes(raw)
}

fn text_from(payload: &[u8], offset: usize) -> String {
    match payload.get(offset..) {
        Some(rest) => String::from_utf8_lossy(rest).into_owned(),
        None => String::new(),
    }
}

impl Message {
    /// The wire type byte for this message.
    pub fn kind(&self) -> u8 {
        match self {
            Self::ConnectRequest { .. } => 0x01,
            Self::Disconnect { .. } => 0x02,
            Self::ConnectionApproved { .. } => 0x03,
            Self::PlayerAppearance { .. } => 0x04,
            Self::SetInventorySlot { .. } => 0x05,
            Self::RequestWorldInfo => 0x06,
            Self::WorldInfo { .. } => 0x07,
            Self::RequestTileData { .. } => 0x08,
            Self::StatusBarText { .. } => 0x09,
            Self::SpawnPlayer { .. } => 0x0C,
            Self::SetLife { .. } => 0x10,
            Self::Chat { .. } => 0x19,
            Self::RequestPassword => 0x25,
            Self::SendPassword { .. } => 0x26,
            Self::SetMana { .. } => 0x2A,
            Self::Spawn => 0x31,
            Self::SetBuffs { .. } => 0x32,
            Self::Unknown { kind, .. } => *kind,
        }
    }

    /// Parse a complete frame into a typed message.
    ///
    /// Only the inbound set is recognized; other type bytes become
    /// [`Message::Unknown`]. A recognized frame whose payload is too
    /// short for its fixed-width fields is [`ProtoError::Truncated`].
    pub fn parse(frame: &Frame) -> Result<Self> {
        let p = &frame.payload[..];
        Ok(match frame.kind {
            0x02 => Self::Disconnect {
                reason: text_from(p, 0),
            },
            0x03 => {
                require(p, 1, "connection-approved")?;
                Self::ConnectionApproved { slot: p[0] }
            }
            0x04 => {
                require(p, 1, "player-appearance")?;
                Self::PlayerAppearance {
                    slot: p[0],
                    name: text_from(p, APPEARANCE_NAME_OFFSET),
                }
            }
            0x07 => {
                require(p, WORLD_SPAWN_OFFSET + 8, "world-information")?;
                Self::WorldInfo {
                    spawn: (
                        i32_at(p, WORLD_SPAWN_OFFSET),
                        i32_at(p, WORLD_SPAWN_OFFSET + 4),
                    ),
                    world_name: text_from(p, WORLD_NAME_OFFSET),
                }
            }
            0x09 => {
                require(p, 4, "statusbar-text")?;
                Self::StatusBarText {
                    count: i32_at(p, 0),
                    text: text_from(p, 4),
                }
            }
            0x19 => {
                require(p, 4, "chat")?;
                Self::Chat {
                    slot: p[0],
                    color: (p[1], p[2], p[3]),
                    text: text_from(p, 4),
                }
            }
            0x25 => Self::RequestPassword,
            0x31 => Self::Spawn,
            kind => Self::Unknown {
                kind,
                payload: frame.payload.clone(),
            },
        })
    }

    /// Encode this message into a frame.
    pub fn to_frame(&self) -> Frame {
        let mut body = BytesMut::new();
        match self {
            Self::ConnectRequest { version } => body.extend_from_slice(version.as_bytes()),
            Self::Disconnect { reason } => body.extend_from_slice(reason.as_bytes()),
            Self::ConnectionApproved { slot } => body.put_u8(*slot),
            Self::PlayerAppearance { slot, name } => {
                body.put_u8(*slot);
                body.extend_from_slice(&[0u8; APPEARANCE_NAME_OFFSET - 1]);
                body.extend_from_slice(name.as_bytes());
            }
            Self::SetInventorySlot {
                slot,
                item_slot,
                stack,
                prefix,
                item,
            } => {
                body.put_u8(*slot);
                body.put_u8(*item_slot);
                body.put_u8(*stack);
                body.put_u8(*prefix);
                body.put_i16_le(*item);
            }
            Self::RequestWorldInfo => {}
            Self::WorldInfo { spawn, world_name } => {
                body.extend_from_slice(&[0u8; WORLD_SPAWN_OFFSET]);
                body.put_i32_le(spawn.0);
                body.put_i32_le(spawn.1);
                body.extend_from_slice(&[0u8; WORLD_NAME_OFFSET - WORLD_SPAWN_OFFSET - 8]);
                body.extend_from_slice(world_name.as_bytes());
            }
            Self::RequestTileData { x, y } => {
                body.put_i32_le(*x);
                body.put_i32_le(*y);
            }
            Self::StatusBarText { count, text } => {
                body.put_i32_le(*count);
                body.extend_from_slice(text.as_bytes());
            }
            Self::SpawnPlayer { slot, x, y } => {
                body.put_u8(*slot);
                body.put_i32_le(*x);
                body.put_i32_le(*y);
            }
            Self::SetLife { slot, current, max } => {
                body.put_u8(*slot);
                body.put_i32_le(*current);
                body.put_i32_le(*max);
            }
            Self::Chat { slot, color, text } => {
                body.put_u8(*slot);
                body.put_u8(color.0);
                body.put_u8(color.1);
                body.put_u8(color.2);
                body.extend_from_slice(text.as_bytes());
            }
            Self::RequestPassword => {}
            Self::SendPassword { password } => body.extend_from_slice(password.as_bytes()),
            Self::SetMana { slot, current, max } => {
                body.put_u8(*slot);
                body.put_i32_le(*current);
                body.put_i32_le(*max);
            }
            Self::Spawn => {}
            Self::SetBuffs { buffs } => body.extend_from_slice(buffs),
            Self::Unknown { payload, .. } => body.extend_from_slice(payload),
        }
        Frame::new(self.kind(), body.freeze())
    }

    /// Encode this message straight to wire bytes.
    pub fn encode(&self) -> Bytes {
        self.to_frame().encode()
    }
}
