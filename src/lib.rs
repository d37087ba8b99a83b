//! terralink - IRC-side chat bridge for Terraria game servers.
//!
//! A cooperative single-threaded runtime hosts the whole bridge: an
//! event bus with suspendable tasks, a timer queue, and buffered
//! connections, all deterministic and free of I/O. The tokio driver in
//! [`net::driver`] is the only async code and the only place a socket
//! is touched, which is what makes the session logic testable without
//! a server on the other end.

pub mod bridge;
pub mod config;
pub mod error;
pub mod net;
pub mod runtime;

pub use bridge::Bridge;
pub use config::Config;
pub use error::BridgeError;
pub use runtime::Runtime;
