//! WebSocket server configuration.

use ocppd_core::ProtocolVersion;
use ocppd_engine::EndpointConfig;
use serde::{Deserialize, Serialize};

fn default_host() -> String {
    "127.0.0.1".to_owned()
}

fn default_route() -> String {
    "ocpp".to_owned()
}

fn default_protocols() -> Vec<ProtocolVersion> {
    ProtocolVersion::ALL.to_vec()
}

fn default_require_basic_auth() -> bool {
    true
}

fn default_max_message_size() -> usize {
    1024 * 1024
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

fn default_heartbeat_timeout_secs() -> u64 {
    90
}

/// Configuration for the WebSocket transport.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WsConfig {
    /// Bind address.
    #[serde(default = "default_host")]
    pub host: String,
    /// Bind port; 0 assigns an ephemeral port.
    #[serde(default)]
    pub port: u16,
    /// Route prefix clients connect under (`/{route}/{client_id}`).
    #[serde(default = "default_route")]
    pub route: String,
    /// Subprotocols this server is willing to speak.
    #[serde(default = "default_protocols")]
    pub protocols: Vec<ProtocolVersion>,
    /// Whether a Basic Authorization header is mandatory on upgrade.
    #[serde(default = "default_require_basic_auth")]
    pub require_basic_auth: bool,
    /// Maximum accepted WebSocket message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// Seconds between liveness pings.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// Seconds without a pong before a connection is considered dead.
    #[serde(default = "default_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: u64,
    /// Engine-level endpoint configuration.
    #[serde(default)]
    pub endpoint: EndpointConfig,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: 0,
            route: default_route(),
            protocols: default_protocols(),
            require_basic_auth: default_require_basic_auth(),
            max_message_size: default_max_message_size(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            heartbeat_timeout_secs: default_heartbeat_timeout_secs(),
            endpoint: EndpointConfig::default(),
        }
    }
}

impl WsConfig {
    /// The `host:port` bind address.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Interval between liveness pings.
    #[must_use]
    pub fn heartbeat_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Pongless window after which a connection is dropped.
    #[must_use]
    pub fn heartbeat_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.heartbeat_timeout_secs)
    }
}
