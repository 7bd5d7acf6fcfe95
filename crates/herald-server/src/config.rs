//! Runtime configuration for the notification server.

use herald_settings::ServerSettings;
use serde::{Deserialize, Serialize};

/// Configuration for [`NotificationServer`](crate::server::NotificationServer).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"0.0.0.0"`).
    pub host: String,
    /// Port to bind (default `4000`, `0` picks a free port).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Heartbeat interval in seconds.
    pub heartbeat_interval_secs: u64,
    /// Close a connection after this many seconds without a pong.
    pub heartbeat_timeout_secs: u64,
    /// Per-connection outbound queue depth.
    pub send_queue_capacity: usize,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from(&ServerSettings::default())
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(s: &ServerSettings) -> Self {
        Self {
            host: s.host.clone(),
            port: s.port,
            max_connections: s.max_connections,
            heartbeat_interval_secs: s.heartbeat_interval_secs,
            heartbeat_timeout_secs: s.heartbeat_timeout_secs,
            send_queue_capacity: s.send_queue_capacity,
            max_message_size: s.max_message_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_bind_all_interfaces_on_4000() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.port, 4000);
    }

    #[test]
    fn default_limits() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.max_connections, 1024);
        assert_eq!(cfg.heartbeat_interval_secs, 30);
        assert_eq!(cfg.heartbeat_timeout_secs, 90);
        assert_eq!(cfg.send_queue_capacity, 256);
        assert_eq!(cfg.max_message_size, 64 * 1024);
    }

    #[test]
    fn from_settings_copies_every_field() {
        let settings = ServerSettings {
            host: "127.0.0.1".into(),
            port: 8080,
            max_connections: 3,
            heartbeat_interval_secs: 5,
            heartbeat_timeout_secs: 15,
            send_queue_capacity: 8,
            max_message_size: 512,
        };
        let cfg = ServerConfig::from(&settings);
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.max_connections, 3);
        assert_eq!(cfg.heartbeat_interval_secs, 5);
        assert_eq!(cfg.heartbeat_timeout_secs, 15);
        assert_eq!(cfg.send_queue_capacity, 8);
        assert_eq!(cfg.max_message_size, 512);
    }

    #[test]
    fn struct_update_syntax() {
        let cfg = ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            ..ServerConfig::default()
        };
        assert_eq!(cfg.port, 0);
        assert_eq!(cfg.max_connections, 1024);
    }
}
