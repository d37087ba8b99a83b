//! Tokio host for the runtime.
//!
//! The runtime itself is synchronous and deterministic; this driver is
//! the only async code in the crate. It owns the actual sockets,
//! carries out the runtime's [`IoRequest`]s, feeds received bytes back
//! in, and calls `tick` on a fixed cadence. At most one connection is
//! live at a time, matching the single upstream server the bridge
//! talks to.

use std::time::{Duration, Instant};

use anyhow::bail;
use futures_util::future::{BoxFuture, FutureExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

use crate::net::connection::ConnId;
use crate::runtime::{Control, IoRequest, Runtime};

/// Scheduler cadence. Timer resolution and flood-guard replay latency
/// are bounded by this.
pub const TICK_INTERVAL: Duration = Duration::from_millis(100);

type Dialing = (ConnId, BoxFuture<'static, std::io::Result<TcpStream>>);

/// Drive the runtime until it requests shutdown.
pub async fn run(mut rt: Runtime) -> anyhow::Result<()> {
    let mut tick = tokio::time::interval(TICK_INTERVAL);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut active: Option<(ConnId, TcpStream)> = None;
    let mut dialing: Option<Dialing> = None;
    let mut read_buf = vec![0u8; 8192];

    loop {
        for req in rt.take_io_requests() {
            match req {
                IoRequest::Dial { conn, addr } => {
                    trace!(conn = %conn, addr = %addr, "dial requested");
                    dialing = Some((conn, TcpStream::connect(addr).boxed()));
                }
                IoRequest::Close { conn, pending } => {
                    if dialing.as_ref().is_some_and(|(id, _)| *id == conn) {
                        dialing = None;
                    }
                    if active.as_ref().is_some_and(|(id, _)| *id == conn) {
                        let (_, mut stream) = active.take().expect("active checked");
                        // Best effort: the connection is going away
                        // either way.
                        for chunk in pending {
                            let _ = stream.write_all(&chunk).await;
                        }
                        let _ = stream.shutdown().await;
                        debug!(conn = %conn, "socket closed");
                    }
                }
            }
        }

        let mut write_err = None;
        if let Some((conn, stream)) = active.as_mut() {
            for chunk in rt.take_outbound(*conn) {
                if let Err(e) = stream.write_all(&chunk).await {
                    write_err = Some((*conn, e));
                    break;
                }
            }
        }
        if let Some((conn, e)) = write_err {
            active = None;
            rt.on_io_error(conn, e);
            continue;
        }

        tokio::select! {
            _ = tick.tick() => {
                if rt.tick(Instant::now()) == Control::Shutdown {
                    bail!(
                        "unrecoverable failure: {}",
                        rt.shutdown_reason().unwrap_or("unknown")
                    );
                }
            }

            result = async {
                let (_, fut) = dialing.as_mut().expect("dial branch enabled");
                fut.await
            }, if dialing.is_some() => {
                let (conn, _) = dialing.take().expect("dial branch enabled");
                match result {
                    Ok(stream) => {
                        let _ = stream.set_nodelay(true);
                        debug!(conn = %conn, "connected");
                        active = Some((conn, stream));
                    }
                    Err(e) => rt.on_io_error(conn, e),
                }
            }

            result = async {
                let (_, stream) = active.as_mut().expect("read branch enabled");
                stream.read(&mut read_buf).await
            }, if active.is_some() => {
                let conn = active.as_ref().expect("read branch enabled").0;
                match result {
                    Ok(0) => {
                        active = None;
                        rt.on_peer_closed(conn);
                    }
                    Ok(n) => rt.on_data(conn, &read_buf[..n]),
                    Err(e) => {
                        active = None;
                        rt.on_io_error(conn, e);
                    }
                }
            }
        }
    }
}
