//! Socket-facing layer: connection state, outbound flood control, and
//! the tokio host driving the runtime.

pub mod connection;
pub mod driver;
pub mod flood;

pub use connection::{ConnId, Connection};
pub use flood::FloodGuard;
