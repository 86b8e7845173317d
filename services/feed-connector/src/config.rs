//! Connection configuration

use serde::{Deserialize, Serialize};

/// Configuration for one venue connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Venue endpoint, e.g. `wss://feed.example.com:443`
    pub endpoint: String,
    /// Account username
    pub username: String,
    /// Account password
    pub password: String,
    /// Application identity sent in the login frame
    #[serde(default = "default_app_name")]
    pub app_name: String,
    /// Application version sent in the login frame
    #[serde(default = "default_app_version")]
    pub app_version: String,
    /// Protocol version sent in the login frame
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,
    /// Receive timeout; a heartbeat is sent each time it elapses
    #[serde(default = "default_recv_timeout_ms")]
    pub recv_timeout_ms: u64,
    /// How long to wait for the login response
    #[serde(default = "default_login_timeout_ms")]
    pub login_timeout_ms: u64,
    /// Consecutive silent receive timeouts tolerated before the connection
    /// is considered dead
    #[serde(default = "default_max_heartbeat_misses")]
    pub max_heartbeat_misses: u32,
    /// Reconnect attempts before giving up terminally
    #[serde(default = "default_max_reconnects")]
    pub max_reconnect_attempts: u32,
    /// Base reconnect delay; doubles per consecutive attempt
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

impl ConnectionConfig {
    /// Config with production defaults for everything but the credentials
    pub fn new(
        endpoint: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            username: username.into(),
            password: password.into(),
            app_name: default_app_name(),
            app_version: default_app_version(),
            protocol_version: default_protocol_version(),
            recv_timeout_ms: default_recv_timeout_ms(),
            login_timeout_ms: default_login_timeout_ms(),
            max_heartbeat_misses: default_max_heartbeat_misses(),
            max_reconnect_attempts: default_max_reconnects(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
        }
    }
}

fn default_app_name() -> String {
    "levelwatch".to_string()
}

fn default_app_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_protocol_version() -> String {
    "3.9".to_string()
}

fn default_recv_timeout_ms() -> u64 {
    5_000
}

fn default_login_timeout_ms() -> u64 {
    30_000
}

fn default_max_heartbeat_misses() -> u32 {
    3
}

fn default_max_reconnects() -> u32 {
    5
}

fn default_reconnect_delay_ms() -> u64 {
    5_000
}
