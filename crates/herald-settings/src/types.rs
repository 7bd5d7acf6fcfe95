//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a settings
//! file may be partial: missing fields keep their compiled default.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type for the relay.
///
/// ```json
/// {
///   "server": { "port": 8080, "maxConnections": 4096 },
///   "logging": { "level": "debug", "format": "json" }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeraldSettings {
    /// Network and connection settings.
    pub server: ServerSettings,
    /// Log output settings.
    pub logging: LoggingSettings,
}

impl HeraldSettings {
    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        let server = &self.server;
        if server.host.trim().is_empty() {
            return Err(SettingsError::InvalidValue("host must not be empty".into()));
        }
        if server.max_connections == 0 {
            return Err(SettingsError::InvalidValue(
                "maxConnections must be at least 1".into(),
            ));
        }
        if server.heartbeat_interval_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "heartbeatIntervalSecs must be at least 1".into(),
            ));
        }
        if server.heartbeat_timeout_secs < server.heartbeat_interval_secs {
            return Err(SettingsError::InvalidValue(format!(
                "heartbeatTimeoutSecs ({}) must not be shorter than heartbeatIntervalSecs ({})",
                server.heartbeat_timeout_secs, server.heartbeat_interval_secs
            )));
        }
        if server.send_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "sendQueueCapacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Server network and runtime settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// HTTP + WebSocket port.
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Interval between server Ping frames, in seconds.
    pub heartbeat_interval_secs: u64,
    /// Silence after which a connection is closed, in seconds.
    pub heartbeat_timeout_secs: u64,
    /// Outbound messages buffered per connection before pushes are dropped.
    pub send_queue_capacity: usize,
    /// Largest inbound WebSocket message accepted, in bytes.
    pub max_message_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4000,
            max_connections: 1024,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            send_queue_capacity: 256,
            max_message_size: 64 * 1024,
        }
    }
}

/// Log output format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable single-line output.
    #[default]
    Compact,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    /// Parse a format name (case-insensitive).
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "compact" | "text" => Some(Self::Compact),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive (overridden by `RUST_LOG`).
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}
