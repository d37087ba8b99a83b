//! Per-connection buffering state.

use std::collections::VecDeque;
use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};

/// Opaque connection handle, allocated by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub(crate) u64);

impl std::fmt::Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A single TCP connection as the runtime sees it: two byte queues and
/// an open flag. The host owns the actual socket.
#[derive(Debug)]
pub struct Connection {
    id: ConnId,
    addr: SocketAddr,
    read_buf: BytesMut,
    outbound: VecDeque<Bytes>,
    open: bool,
}

impl Connection {
    pub(crate) fn new(id: ConnId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            read_buf: BytesMut::new(),
            outbound: VecDeque::new(),
            open: true,
        }
    }

    /// Connection handle.
    pub fn id(&self) -> ConnId {
        self.id
    }

    /// Remote address this connection dials.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Whether the connection is still usable.
    pub fn is_open(&self) -> bool {
        self.open
    }

    pub(crate) fn mark_closed(&mut self) {
        self.open = false;
    }

    pub(crate) fn extend_read_buf(&mut self, bytes: &[u8]) {
        self.read_buf.extend_from_slice(bytes);
    }

    pub(crate) fn take_read_buf(&mut self) -> BytesMut {
        std::mem::take(&mut self.read_buf)
    }

    pub(crate) fn restore_read_buf(&mut self, buf: BytesMut) {
        debug_assert!(self.read_buf.is_empty());
        self.read_buf = buf;
    }

    pub(crate) fn push_outbound(&mut self, bytes: Bytes) {
        self.outbound.push_back(bytes);
    }

    pub(crate) fn drain_outbound(&mut self) -> Vec<Bytes> {
        self.outbound.drain(..).collect()
    }
}
