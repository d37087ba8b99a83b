//! Length-prefixed frame codec for tokio.
//!
//! This module provides a codec that reads/writes binary frames of the
//! form `u32-LE length` + `u8 type` + payload. The length field counts
//! the type byte and the payload but not itself, so the smallest legal
//! frame is five bytes on the wire with a length of one.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{ProtoError, Result};

/// Bytes needed before the decoder can see a full header (length + type).
pub const FRAME_HEADER_LEN: usize = 5;

/// Maximum accepted frame length.
///
/// The original protocol carries bulk world data in frames of at most a
/// few hundred kilobytes; anything beyond this is treated as stream
/// corruption rather than buffered indefinitely.
pub const MAX_FRAME_LEN: usize = 1 << 20;

/// One decoded protocol frame: a type byte and its raw payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Message type byte.
    pub kind: u8,
    /// Payload bytes (everything after the type byte).
    pub payload: Bytes,
}

impl Frame {
    /// Create a frame from a type byte and payload bytes.
    pub fn new(kind: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// Total size of this frame on the wire, including the length field.
    pub fn wire_len(&self) -> usize {
        4 + 1 + self.payload.len()
    }

    /// Encode this frame to a standalone byte buffer.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.wire_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Append the wire representation of this frame to `dst`.
    pub fn encode_into(&self, dst: &mut BytesMut) {
        dst.reserve(self.wire_len());
        dst.put_u32_le((1 + self.payload.len()) as u32);
        dst.put_u8(self.kind);
        dst.extend_from_slice(&self.payload);
    }
}

/// Tokio codec for encoding/decoding length-prefixed frames.
///
/// Decoding is incremental: partial frames stay buffered in `src` and
/// `decode` returns `Ok(None)` until the declared length has arrived.
#[derive(Debug, Default)]
pub struct FrameCodec {
    max_len: usize,
}

impl FrameCodec {
    /// Create a codec with the default frame length limit.
    pub fn new() -> Self {
        Self {
            max_len: MAX_FRAME_LEN,
        }
    }

    /// Create a codec with a custom frame length limit.
    pub fn with_max_len(max_len: usize) -> Self {
        Self { max_len }
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ProtoError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if src.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }

        let length = u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if length == 0 {
            return Err(ProtoError::EmptyFrame);
        }
        if length > self.max_len {
            return Err(ProtoError::FrameTooLong {
                actual: length,
                limit: self.max_len,
            });
        }

        if src.len() < 4 + length {
            // Partial frame: reserve what we still expect and wait.
            src.reserve(4 + length - src.len());
            return Ok(None);
        }

        let mut body = src.split_to(4 + length);
        body.advance(4);
        let kind = body.get_u8();
        Ok(Some(Frame {
            kind,
            payload: body.freeze(),
        }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = ProtoError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        if 1 + frame.payload.len() > self.max_len {
            return Err(ProtoError::FrameTooLong {
                actual: 1 + frame.payload.len(),
                limit: self.max_len,
            });
        }
        frame.encode_into(dst);
        Ok(())
    }
}
