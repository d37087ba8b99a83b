//! # terralink-proto
//!
//! Wire protocol for the terralink game bridge: a length-prefixed binary
//! frame codec plus typed message parsing and encoding.
//!
//! Every frame on the wire is `u32-LE length` + `u8 type` + payload,
//! where the length counts the type byte and the payload but not the
//! four length bytes themselves.
//!
//! ## Quick Start
//!
//! ```rust
//! use bytes::BytesMut;
//! use tokio_util::codec::{Decoder, Encoder};
//! use terralink_proto::{Frame, FrameCodec, Message};
//!
//! let mut codec = FrameCodec::new();
//! let mut wire = BytesMut::new();
//!
//! let frame = Message::ConnectRequest { version: "Terraria71".into() }.to_frame();
//! codec.encode(frame, &mut wire).unwrap();
//!
//! let decoded: Frame = codec.decode(&mut wire).unwrap().unwrap();
//! let msg = Message::parse(&decoded).unwrap();
//! assert_eq!(msg, Message::ConnectRequest { version: "Terraria71".into() });
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod error;
pub mod frame;
pub mod message;

pub use error::ProtoError;
pub use frame::{Frame, FrameCodec, FRAME_HEADER_LEN, MAX_FRAME_LEN};
pub use message::{Message, MAX_CHAT_LEN};
