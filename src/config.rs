//! TOML configuration loading.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Could not read the file.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// File read but not valid TOML for our schema.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Game server endpoint.
    pub server: ServerConfig,
    /// Bridge identity and timing.
    #[serde(default)]
    pub bridge: BridgeConfig,
    /// Outbound flood control.
    #[serde(default)]
    pub flood: FloodConfig,
}

/// `[server]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address of the game server.
    pub address: SocketAddr,
}

/// `[bridge]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Player name the bridge joins under.
    pub display_name: String,
    /// Server password, empty for none.
    pub password: String,
    /// Protocol version string sent in the connect request.
    pub version: String,
    /// Delay before redialing after a disconnect.
    pub reconnect_delay_secs: u64,
    /// Keep-alive interval while in-world.
    pub heartbeat_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            display_name: "terralink".to_string(),
            password: String::new(),
            version: "Terraria71".to_string(),
            reconnect_delay_secs: 10,
            heartbeat_secs: 1,
        }
    }
}

impl BridgeConfig {
    /// Reconnect delay as a duration.
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    /// Heartbeat interval as a duration.
    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }
}

/// `[flood]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FloodConfig {
    /// Trailing window length.
    pub window_secs: u64,
    /// Lines allowed per window.
    pub max_lines: usize,
}

impl Default for FloodConfig {
    fn default() -> Self {
        Self {
            window_secs: 9,
            max_lines: 9,
        }
    }
}

impl FloodConfig {
    /// Window as a duration.
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Config {
    /// Load and parse a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }
}
