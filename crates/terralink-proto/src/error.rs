//! Error types for the game bridge protocol library.

use thiserror::Error;

/// Convenience type alias for Results using [`ProtoError`].
pub type Result<T, E = ProtoError> = std::result::Result<T, E>;

/// Protocol-level errors.
///
/// Note that a short read is *not* an error: the decoder returns
/// `Ok(None)` and keeps the partial frame buffered. Only structurally
/// impossible input (a zero-length frame, a length beyond the limit)
/// or truncated fixed-width fields inside a complete frame are errors.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// Frame declared a length of zero; every frame carries at least
    /// its type byte.
    #[error("frame declares zero length (missing type byte)")]
    EmptyFrame,

    /// Frame length exceeds the configured limit.
    #[error("frame too long: {actual} bytes (limit {limit})")]
    FrameTooLong {
        /// Declared frame length in bytes.
        actual: usize,
        /// Maximum permitted frame length.
        limit: usize,
    },

    /// A complete frame arrived but a fixed-width field is missing.
    #[error("truncated {kind} message: {len} payload bytes")]
    Truncated {
        /// Human-readable message kind.
        kind: &'static str,
        /// Actual payload length.
        len: usize,
    },

    /// An IO error occurred (required by the codec traits).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
