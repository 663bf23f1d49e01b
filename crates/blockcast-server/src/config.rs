//! Server configuration.
//!
//! Configuration is layered:
//! - built-in defaults
//! - the first TOML file found in [`CONFIG_PATHS`]
//! - environment variables (`BLOCKCAST_*`, `__` between nested keys, e.g.
//!   `BLOCKCAST_HUB__CLIENT_QUEUE_CAPACITY=64`)

use anyhow::{ensure, Context, Result};
use blockcast_core::HubConfig;
use blockcast_protocol::Encoding;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Candidate configuration files, first match wins.
pub const CONFIG_PATHS: [&str; 3] = [
    "blockcast.toml",
    "/etc/blockcast/blockcast.toml",
    "~/.config/blockcast/blockcast.toml",
];

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Hub configuration.
    #[serde(default)]
    pub hub: HubSection,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path prefix of the WebSocket endpoint; the project id follows it.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Hub configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubSection {
    /// Capacity of the hub's register, unregister and broadcast queues.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Frames buffered per client before it is evicted as too slow.
    #[serde(default = "default_client_queue_capacity")]
    pub client_queue_capacity: usize,

    /// Wire encoding: `json` (text frames) or `msgpack` (binary frames).
    #[serde(default)]
    pub encoding: Encoding,

    /// Broadcast `join` and `leave` messages as users come and go.
    #[serde(default = "default_true")]
    pub presence_events: bool,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum message size in bytes, inbound and outbound.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Ping interval in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,

    /// Close a connection after this long without inbound traffic.
    #[serde(default = "default_heartbeat_timeout")]
    pub timeout_ms: u64,
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

    /// How often hub statistics are copied into gauges, in milliseconds.
    #[serde(default = "default_report_interval")]
    pub report_interval_ms: u64,
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_event_capacity() -> usize {
    1024
}

fn default_client_queue_capacity() -> usize {
    256
}

fn default_max_message_size() -> usize {
    1024 * 1024 // 1 MB
}

fn default_heartbeat_interval() -> u64 {
    30_000 // 30 seconds
}

fn default_heartbeat_timeout() -> u64 {
    60_000 // 60 seconds
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_report_interval() -> u64 {
    5_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            hub: HubSection::default(),
            limits: LimitsConfig::default(),
            heartbeat: HeartbeatConfig::default(),
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

impl Default for HubSection {
    fn default() -> Self {
        Self {
            event_capacity: default_event_capacity(),
            client_queue_capacity: default_client_queue_capacity(),
            encoding: Encoding::default(),
            presence_events: true,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
            timeout_ms: default_heartbeat_timeout(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
            report_interval_ms: default_report_interval(),
        }
    }
}

impl Config {
    /// Load configuration from defaults, the first config file found, and
    /// the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or the result is
    /// invalid.
    pub fn load() -> Result<Self> {
        let mut builder = ::config::Config::builder();

        for path in &CONFIG_PATHS {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                builder = builder.add_source(::config::File::new(
                    expanded.as_ref(),
                    ::config::FileFormat::Toml,
                ));
                break;
            }
        }

        let config: Config = builder
            .add_source(
                ::config::Environment::with_prefix("BLOCKCAST")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to load configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")?;

        config.validate()?;
        Ok(config)
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

        config.validate()?;
        Ok(config)
    }

    /// Check values that serde cannot.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.hub.event_capacity > 0, "hub.event_capacity must be positive");
        ensure!(
            self.hub.client_queue_capacity > 0,
            "hub.client_queue_capacity must be positive"
        );
        ensure!(self.limits.max_message_size > 0, "limits.max_message_size must be positive");
        ensure!(self.heartbeat.interval_ms > 0, "heartbeat.interval_ms must be positive");
        ensure!(
            self.heartbeat.timeout_ms > self.heartbeat.interval_ms,
            "heartbeat.timeout_ms must exceed heartbeat.interval_ms"
        );
        ensure!(
            self.metrics.report_interval_ms > 0,
            "metrics.report_interval_ms must be positive"
        );
        ensure!(
            self.transport.websocket_path.starts_with('/'),
            "transport.websocket_path must start with '/'"
        );
        Ok(())
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host` is not an IP address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }

    /// Hub settings derived from this configuration.
    #[must_use]
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            event_capacity: self.hub.event_capacity,
            client_queue_capacity: self.hub.client_queue_capacity,
            encoding: self.hub.encoding,
            max_frame_size: self.limits.max_message_size,
        }
    }

    /// Route of the WebSocket endpoint.
    #[must_use]
    pub fn websocket_route(&self) -> String {
        format!("{}/:project_id", self.transport.websocket_path.trim_end_matches('/'))
    }

    /// Ping interval.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat.interval_ms)
    }

    /// Inbound silence tolerated before a connection is dropped.
    #[must_use]
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat.timeout_ms)
    }
}
