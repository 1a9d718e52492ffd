//! Client settings types.
//!
//! All structs use `camelCase` on disk and `#[serde(default)]`, so a settings
//! file only needs the keys it overrides.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use dispatcher_core::constants::{
    DEFAULT_CALL_TIMEOUT_MS, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_ENTITY_MAX_SIZE, DEFAULT_HOST,
    DEFAULT_PORT, SOCKET_PATH,
};

/// Root settings for a dispatcher client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Dispatcher host name or address.
    pub host: String,
    /// Dispatcher port.
    pub port: u16,
    /// Path of the RPC/event socket.
    pub socket_path: String,
    /// Default RPC call timeout in milliseconds.
    pub call_timeout_ms: u64,
    /// Transport connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Capacity of the client's error, signal, and event broadcast channels.
    pub event_buffer_size: usize,
    /// Default `tracing` filter for binaries.
    pub log_level: String,
    /// Entity cache settings.
    pub entity: EntitySettings,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            socket_path: SOCKET_PATH.to_string(),
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            event_buffer_size: 256,
            log_level: "warn".to_string(),
            entity: EntitySettings::default(),
        }
    }
}

impl ClientSettings {
    /// WebSocket URL of the RPC/event socket.
    pub fn socket_url(&self) -> String {
        format!("ws://{}:{}{}", self.host, self.port, self.socket_path)
    }

    /// Default call timeout as a `Duration`.
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Connect timeout as a `Duration`.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Entity cache settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EntitySettings {
    /// Default capacity of each collection.
    pub max_size: usize,
    /// Whether a subscriber loads an initial snapshot on start.
    pub fetch_initial_snapshot: bool,
}

impl Default for EntitySettings {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_ENTITY_MAX_SIZE,
            fetch_initial_snapshot: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = ClientSettings::default();
        assert_eq!(s.port, 5000);
        assert_eq!(s.socket_path, "/socket");
        assert_eq!(s.call_timeout_ms, 20_000);
        assert_eq!(s.entity.max_size, 2000);
        assert!(!s.entity.fetch_initial_snapshot);
    }

    #[test]
    fn socket_url_from_parts() {
        let s = ClientSettings {
            host: "nas.local".into(),
            ..ClientSettings::default()
        };
        assert_eq!(s.socket_url(), "ws://nas.local:5000/socket");
    }

    #[test]
    fn durations() {
        let s = ClientSettings::default();
        assert_eq!(s.call_timeout(), Duration::from_secs(20));
        assert_eq!(s.connect_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn camel_case_on_disk() {
        let json = serde_json::to_value(ClientSettings::default()).unwrap();
        assert!(json.get("callTimeoutMs").is_some());
        assert!(json["entity"].get("fetchInitialSnapshot").is_some());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let s: ClientSettings = serde_json::from_str(r#"{"port": 6000}"#).unwrap();
        assert_eq!(s.port, 6000);
        assert_eq!(s.host, DEFAULT_HOST);
    }
}
