//! terralinkd - bridge daemon entry point.

use std::time::Instant;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use terralink::runtime::event::{EventKey, Payload};
use terralink::{Bridge, Config, Runtime};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path, error = %e, "Failed to load config");
        e
    })?;

    info!(
        server = %config.server.address,
        name = %config.bridge.display_name,
        "Starting terralinkd"
    );

    let mut rt = Runtime::new(Instant::now());

    // Until an IRC client is wired in, game-side chat lands in the log.
    rt.subscribe(EventKey::RelayFromGame, |_, ev| {
        if let Payload::Relay { source, text } = &ev.payload {
            info!(source = %source, "{text}");
        }
        Ok(())
    });

    let bridge = Bridge::install(&mut rt, config);
    bridge.dial(&mut rt);

    terralink::net::driver::run(rt).await
}
