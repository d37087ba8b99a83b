//! Crate-wide error types.

use thiserror::Error;

use crate::net::connection::ConnId;

/// Errors surfaced by event handlers and the bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Wire protocol violation from the game server.
    #[error("protocol error: {0}")]
    Proto(#[from] terralink_proto::ProtoError),

    /// An event referenced a connection the runtime no longer knows.
    #[error("unknown connection {0}")]
    UnknownConnection(ConnId),

    /// Socket-level failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Invariant violation inside the bridge itself.
    #[error("internal error: {0}")]
    Internal(String),
}
