//! Server configuration.
//!
//! Configuration is layered:
//! - Built-in defaults
//! - TOML configuration file (`--config`, or the first of the default paths)
//! - Environment variables (`SWITCHBOARD_*`, nested keys joined with `__`,
//!   e.g. `SWITCHBOARD_HEARTBEAT__INTERVAL_MS=10000`)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use switchboard_core::ConnectionConfig;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "SWITCHBOARD";

/// Config files searched when none is given explicitly.
const DEFAULT_PATHS: [&str; 3] = [
    "switchboard.toml",
    "/etc/switchboard/switchboard.toml",
    "~/.config/switchboard/switchboard.toml",
];

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

    /// Per-connection limits and deadlines.
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
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Per-connection limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Outbound queue capacity per connection.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// How long a send waits for queue space, in milliseconds.
    #[serde(default = "default_send_grace")]
    pub send_grace_ms: u64,

    /// Write deadline in milliseconds.
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,

    /// Read deadline in milliseconds.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,

    /// Maximum inbound message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Run the liveness monitor on new connections.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Heartbeat interval in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,

    /// Idle time before a connection is dropped, in milliseconds.
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

    /// How often hub statistics are sampled into gauges, in milliseconds.
    #[serde(default = "default_sample_interval")]
    pub sample_interval_ms: u64,
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

fn default_queue_capacity() -> usize {
    1024
}

fn default_send_grace() -> u64 {
    5_000
}

fn default_write_timeout() -> u64 {
    10_000
}

fn default_read_timeout() -> u64 {
    60_000
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
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

fn default_sample_interval() -> u64 {
    5_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
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

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            send_grace_ms: default_send_grace(),
            write_timeout_ms: default_write_timeout(),
            read_timeout_ms: default_read_timeout(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
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
            sample_interval_ms: default_sample_interval(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, or the first default path that
    /// exists, then apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or an
    /// environment override has the wrong type.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => Some(path.to_path_buf()),
            None => Self::find_default_file(),
        };

        let mut builder = config::Config::builder();
        if let Some(file) = &file {
            tracing::debug!(path = %file.display(), "Loading config file");
            builder = builder.add_source(
                config::File::from(file.as_path()).format(config::FileFormat::Toml),
            );
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .and_then(|settings| settings.try_deserialize::<Config>())
            .with_context(|| match &file {
                Some(file) => format!("Failed to load config file: {}", file.display()),
                None => "Failed to load configuration from environment".to_string(),
            })?;

        Ok(config)
    }

    fn find_default_file() -> Option<PathBuf> {
        DEFAULT_PATHS
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).into_owned()))
            .find(|path| path.exists())
    }

    /// Load configuration from a specific file, without environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` is not a valid socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address: {}:{}", self.host, self.port))
    }

    /// Per-connection settings for the hub.
    #[must_use]
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            queue_capacity: self.limits.queue_capacity,
            send_grace: Duration::from_millis(self.limits.send_grace_ms),
            write_timeout: Duration::from_millis(self.limits.write_timeout_ms),
            read_timeout: Duration::from_millis(self.limits.read_timeout_ms),
            heartbeat_interval: Duration::from_millis(self.heartbeat.interval_ms),
            heartbeat_timeout: Duration::from_millis(self.heartbeat.timeout_ms),
            max_message_size: self.limits.max_message_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.transport.websocket_path, "/ws");
        assert!(config.heartbeat.enabled);
    }

    #[test]
    fn test_config_bind_addr() {
        let config = Config::default();
        let addr = config.bind_addr().unwrap();
        assert_eq!(addr.port(), 8080);

        let bad = Config {
            host: "not a host".into(),
            ..Config::default()
        };
        assert!(bad.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [heartbeat]
            enabled = false
            interval_ms = 10000

            [limits]
            queue_capacity = 16
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert!(!config.heartbeat.enabled);
        assert_eq!(config.heartbeat.interval_ms, 10_000);
        assert_eq!(config.heartbeat.timeout_ms, 60_000);
        assert_eq!(config.limits.queue_capacity, 16);
        assert_eq!(config.limits.send_grace_ms, 5_000);
    }

    #[test]
    fn test_connection_config_mapping() {
        let conn = Config::default().connection_config();
        assert_eq!(conn.queue_capacity, 1024);
        assert_eq!(conn.send_grace, Duration::from_secs(5));
        assert_eq!(conn.write_timeout, Duration::from_secs(10));
        assert_eq!(conn.read_timeout, Duration::from_secs(60));
        assert_eq!(conn.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(conn.heartbeat_timeout, Duration::from_secs(60));
        assert_eq!(conn.max_message_size, 64 * 1024);
    }

    #[test]
    fn test_from_missing_file_fails() {
        assert!(Config::from_file("/definitely/not/here.toml").is_err());
    }
}
