//! # Configuration Management
//!
//! Centralized configuration for RNP servers and clients.
//!
//! ## Configuration Sources
//! - TOML files via [`NetworkConfig::from_file`]
//! - Direct instantiation with defaults
//! - `RNP_*` environment variable overrides via [`NetworkConfig::from_env`]
//!
//! Durations are written as integer milliseconds and log levels as lowercase
//! strings, so a config file looks like:
//!
//! ```toml
//! [server]
//! address = "0.0.0.0:4567"
//! tick_rate_hz = 60
//!
//! [transport]
//! retransmit_interval = 200
//! ```

use crate::core::packet::{HEADER_SIZE, MAX_PAYLOAD};
use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Default UDP port for RNP servers.
pub const DEFAULT_PORT: u16 = 4567;

/// Default server tick rate advertised in CONNECT_ACCEPT.
pub const DEFAULT_TICK_RATE_HZ: u16 = 60;

/// Default interval between resends of unacknowledged reliable packets.
pub const DEFAULT_RETRANSMIT_INTERVAL: Duration = Duration::from_millis(200);

/// Main network configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub client: ClientConfig,

    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NetworkConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Defaults overridden by `RNP_*` environment variables.
    ///
    /// Unparseable numeric values are reported rather than ignored.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("RNP_SERVER_ADDRESS") {
            config.server.address = addr;
        }

        if let Ok(addr) = std::env::var("RNP_CLIENT_ADDRESS") {
            config.client.address = addr;
        }

        if let Ok(name) = std::env::var("RNP_PLAYER_NAME") {
            config.client.player_name = name;
        }

        if let Ok(rate) = std::env::var("RNP_TICK_RATE_HZ") {
            config.server.tick_rate_hz = rate.parse::<u16>().map_err(|e| {
                ProtocolError::ConfigError(format!("RNP_TICK_RATE_HZ '{rate}': {e}"))
            })?;
        }

        if let Ok(interval) = std::env::var("RNP_RETRANSMIT_INTERVAL_MS") {
            let millis = interval.parse::<u64>().map_err(|e| {
                ProtocolError::ConfigError(format!("RNP_RETRANSMIT_INTERVAL_MS '{interval}': {e}"))
            })?;
            config.transport.retransmit_interval = Duration::from_millis(millis);
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.client.validate());
        errors.extend(self.transport.validate());
        errors.extend(self.logging.validate());

        if usize::from(self.server.mtu_payload_bytes) > self.transport.max_payload_size {
            errors.push(format!(
                "Advertised MTU payload {} exceeds transport max payload {}",
                self.server.mtu_payload_bytes, self.transport.max_payload_size
            ));
        }

        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Server-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address, e.g. "0.0.0.0:4567"
    pub address: String,

    /// Tick rate advertised to clients
    pub tick_rate_hz: u16,

    /// Largest payload clients should send, advertised in CONNECT_ACCEPT
    pub mtu_payload_bytes: u16,

    /// Capability bits advertised in CONNECT_ACCEPT
    pub server_caps: u32,

    /// CONNECTs beyond this many clients are refused with SERVER_FULL
    pub max_clients: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: format!("0.0.0.0:{DEFAULT_PORT}"),
            tick_rate_hz: DEFAULT_TICK_RATE_HZ,
            mtu_payload_bytes: MAX_PAYLOAD as u16,
            server_caps: 0,
            max_clients: 64,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Server address cannot be empty".to_string());
        } else if self.address.parse::<SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid server address format: '{}' (expected format: '0.0.0.0:4567')",
                self.address
            ));
        }

        if self.tick_rate_hz == 0 {
            errors.push("Tick rate must be greater than 0".to_string());
        } else if self.tick_rate_hz > 1000 {
            errors.push(format!(
                "Tick rate too high: {} Hz (maximum: 1000)",
                self.tick_rate_hz
            ));
        }

        if self.mtu_payload_bytes == 0 {
            errors.push("MTU payload bytes must be greater than 0".to_string());
        } else if usize::from(self.mtu_payload_bytes) > MAX_PAYLOAD {
            errors.push(format!(
                "MTU payload bytes too large: {} (maximum: {MAX_PAYLOAD})",
                self.mtu_payload_bytes
            ));
        }

        if self.max_clients == 0 {
            errors.push("Max clients must be greater than 0".to_string());
        }

        errors
    }

    /// Parsed listen address.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.address.parse().map_err(|e| {
            ProtocolError::ConfigError(format!("Invalid server address '{}': {e}", self.address))
        })
    }
}

/// Client-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server to connect to, as "host:port"
    pub address: String,

    /// Name sent in CONNECT; cut to 31 bytes on the wire
    pub player_name: String,

    /// Capability bits sent in CONNECT
    pub client_caps: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: format!("127.0.0.1:{DEFAULT_PORT}"),
            player_name: String::from("player"),
            client_caps: 0,
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Client address cannot be empty".to_string());
        } else if self.host_port().is_err() {
            errors.push(format!(
                "Invalid client address format: '{}' (expected format: 'example.com:4567')",
                self.address
            ));
        }

        if self.player_name.is_empty() {
            errors.push("Player name cannot be empty".to_string());
        }

        errors
    }

    /// Split `address` into host and port. Bracketed IPv6 hosts lose their
    /// brackets.
    pub fn host_port(&self) -> Result<(String, u16)> {
        let invalid =
            || ProtocolError::ConfigError(format!("Invalid client address '{}'", self.address));

        let (host, port) = self.address.rsplit_once(':').ok_or_else(invalid)?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse::<u16>().map_err(|_| invalid())?;
        Ok((host.to_string(), port))
    }
}

/// I/O loop and event delivery settings shared by client and server.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Largest payload the engine will encode
    pub max_payload_size: usize,

    /// Receive buffer per datagram; longer datagrams are truncated by the OS
    pub recv_buffer_size: usize,

    /// Capacity of the channel delivering events to the application
    pub event_queue_capacity: usize,

    /// How often unacknowledged reliable packets are resent; 0 disables
    #[serde(with = "duration_serde")]
    pub retransmit_interval: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_payload_size: MAX_PAYLOAD,
            recv_buffer_size: 2048,
            event_queue_capacity: 1024,
            retransmit_interval: DEFAULT_RETRANSMIT_INTERVAL,
        }
    }
}

impl TransportConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_payload_size == 0 {
            errors.push("Max payload size cannot be 0".to_string());
        } else if self.max_payload_size > MAX_PAYLOAD {
            errors.push(format!(
                "Max payload size too large: {} bytes (maximum: {MAX_PAYLOAD})",
                self.max_payload_size
            ));
        }

        if self.recv_buffer_size < HEADER_SIZE + self.max_payload_size {
            errors.push(format!(
                "Receive buffer too small: {} bytes (minimum: {})",
                self.recv_buffer_size,
                HEADER_SIZE + self.max_payload_size
            ));
        }

        if self.event_queue_capacity == 0 {
            errors.push("Event queue capacity must be greater than 0".to_string());
        }

        if !self.retransmit_interval.is_zero() && self.retransmit_interval.as_millis() < 10 {
            errors.push("Retransmit interval too short (minimum: 10ms, or 0 to disable)".to_string());
        } else if self.retransmit_interval.as_secs() > 60 {
            errors.push("Retransmit interval too long (maximum: 60s)".to_string());
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Default level when `RUST_LOG` is unset
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("rnp"),
            log_level: Level::INFO,
            log_to_console: true,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
