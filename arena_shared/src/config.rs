//! Configuration system.
//!
//! Loads server configuration from JSON strings/files (file IO left to app).

use serde::{Deserialize, Serialize};

/// Root server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Lobby listen address, e.g. `127.0.0.1:40000`.
    pub lobby_addr: String,
    /// Fixed simulation tick rate, shared by every room.
    pub tick_hz: u32,
    /// A client silent for this long is dropped from its session.
    #[serde(default = "default_client_timeout_ms")]
    pub client_timeout_ms: u64,
    /// Upper bound on concurrently open rooms.
    #[serde(default = "default_max_rooms")]
    pub max_rooms: usize,
    /// A room that has not filled within this window is closed and its
    /// waiting members get a timeout failure.
    #[serde(default = "default_room_fill_timeout_ms")]
    pub room_fill_timeout_ms: u64,
}

fn default_client_timeout_ms() -> u64 {
    5_000
}

fn default_max_rooms() -> usize {
    64
}

fn default_room_fill_timeout_ms() -> u64 {
    60_000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            lobby_addr: "127.0.0.1:40000".to_string(),
            tick_hz: 60,
            client_timeout_ms: default_client_timeout_ms(),
            max_rooms: default_max_rooms(),
            room_fill_timeout_ms: default_room_fill_timeout_ms(),
        }
    }
}

impl ServerConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_optional_fields() {
        let cfg = ServerConfig::from_json_str(r#"{"lobby_addr":"0.0.0.0:9000","tick_hz":30}"#)
            .unwrap();
        assert_eq!(cfg.tick_hz, 30);
        assert_eq!(cfg.client_timeout_ms, 5_000);
        assert_eq!(cfg.max_rooms, 64);
        assert_eq!(cfg.room_fill_timeout_ms, 60_000);
    }
}
