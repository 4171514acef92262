//! Server configuration.
//!
//! Configuration is layered, later sources winning:
//! - Built-in defaults
//! - The first TOML file found in [`CONFIG_PATHS`], or an explicit `--config` file
//! - Environment variables (`SCRIBBLE__PORT`, `SCRIBBLE__ROOMS__IDLE_TTL_MS`, ...)

use anyhow::{Context, Result};
use scribble_core::{RegistryConfig, RoomConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Files searched for configuration, in order.
pub const CONFIG_PATHS: [&str; 3] = [
    "scribble.toml",
    "/etc/scribble/scribble.toml",
    "~/.config/scribble/scribble.toml",
];

/// Environment variable prefix.
const ENV_PREFIX: &str = "SCRIBBLE";

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Room lifecycle configuration.
    #[serde(default)]
    pub rooms: RoomsConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum number of live rooms.
    #[serde(default = "default_max_rooms")]
    pub max_rooms: usize,

    /// Maximum WebSocket message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Heartbeat interval announced to clients, in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,

    /// Silence after which a connection is dropped, in milliseconds.
    /// Zero keeps connections open regardless of silence. Pings sent every
    /// `interval_ms` let a listening client prove it is alive.
    #[serde(default)]
    pub timeout_ms: u64,
}

/// Room lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomsConfig {
    /// How long an empty room is kept, in milliseconds.
    #[serde(default = "default_idle_ttl")]
    pub idle_ttl_ms: u64,

    /// How long a draft may go without updates, in milliseconds.
    #[serde(default = "default_draft_ttl")]
    pub draft_ttl_ms: u64,

    /// Interval between maintenance passes, in milliseconds.
    #[serde(default = "default_reap_interval")]
    pub reap_interval_ms: u64,

    /// Per-room broadcast buffer. Slower sessions are resynced.
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,

    /// Maximum shapes in effect per room.
    #[serde(default = "default_max_shapes")]
    pub max_shapes: usize,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_connections() -> usize {
    10_000
}

fn default_max_rooms() -> usize {
    10_000
}

fn default_max_message_size() -> usize {
    1024 * 1024 // 1 MB
}

fn default_heartbeat_interval() -> u64 {
    30_000 // 30 seconds
}

fn default_idle_ttl() -> u64 {
    30 * 60 * 1000 // 30 minutes
}

fn default_draft_ttl() -> u64 {
    30_000
}

fn default_reap_interval() -> u64 {
    5_000
}

fn default_broadcast_capacity() -> usize {
    1024
}

fn default_max_shapes() -> usize {
    10_000
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            rooms: RoomsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_rooms: default_max_rooms(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
            timeout_ms: 0,
        }
    }
}

impl HeartbeatConfig {
    /// Silence limit, if one is configured.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            idle_ttl_ms: default_idle_ttl(),
            draft_ttl_ms: default_draft_ttl(),
            reap_interval_ms: default_reap_interval(),
            broadcast_capacity: default_broadcast_capacity(),
            max_shapes: default_max_shapes(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from an explicit file, or the first of
    /// [`CONFIG_PATHS`] that exists, then apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file or an override cannot be parsed.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let file = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => Self::find_file(),
        };

        let mut builder = ::config::Config::builder();
        if let Some(path) = &file {
            tracing::info!("Loading configuration from {}", path.display());
            let defaults = Self::from_file(path)?;
            builder = builder.add_source(
                ::config::Config::try_from(&defaults)
                    .with_context(|| format!("Invalid config file: {}", path.display()))?,
            );
        }

        Self::layer_env(builder)
    }

    fn layer_env(builder: ::config::ConfigBuilder<::config::builder::DefaultState>) -> Result<Self> {
        builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read environment overrides")?
            .try_deserialize()
            .context("Invalid configuration")
    }

    fn find_file() -> Option<PathBuf> {
        CONFIG_PATHS
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
            .find(|path| path.exists())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid host:port {}:{}", self.host, self.port))
    }

    /// Registry settings derived from the room and limit sections.
    #[must_use]
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            max_rooms: self.limits.max_rooms,
            room: RoomConfig {
                broadcast_capacity: self.rooms.broadcast_capacity,
                max_shapes: self.rooms.max_shapes,
            },
            idle_ttl: Duration::from_millis(self.rooms.idle_ttl_ms),
            draft_ttl: Duration::from_millis(self.rooms.draft_ttl_ms),
        }
    }
}
