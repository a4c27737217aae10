//! Endpoint configuration.

use serde::{Deserialize, Serialize};

use ocppd_core::ProtocolVersion;

/// Default timeout for an outbound Call awaiting its response.
pub const DEFAULT_MESSAGE_TIMEOUT_SECS: u64 = 30;

/// Configuration for an [`Endpoint`](crate::endpoint::Endpoint).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Actions accepted inbound and permitted outbound. A Call whose
    /// action is absent is refused (inbound) or dropped (outbound).
    pub allowed_actions: Vec<String>,
    /// Seconds an outbound Call may wait for a response before it is
    /// abandoned and its pending slot freed.
    pub message_timeout_secs: u64,
    /// Protocol sub-versions offered to clients during the handshake.
    pub protocols: Vec<ProtocolVersion>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            allowed_actions: Vec::new(),
            message_timeout_secs: DEFAULT_MESSAGE_TIMEOUT_SECS,
            protocols: vec![ProtocolVersion::Ocpp16],
        }
    }
}

impl EndpointConfig {
    /// Timeout for an outbound Call as a [`std::time::Duration`].
    #[must_use]
    pub fn message_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.message_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EndpointConfig::default();
        assert!(config.allowed_actions.is_empty());
        assert_eq!(config.message_timeout_secs, 30);
        assert_eq!(config.protocols, vec![ProtocolVersion::Ocpp16]);
    }

    #[test]
    fn deserialize_partial_fills_defaults() {
        let config: EndpointConfig =
            serde_json::from_str(r#"{"allowed_actions": ["Heartbeat"]}"#).unwrap();
        assert_eq!(config.allowed_actions, vec!["Heartbeat".to_owned()]);
        assert_eq!(config.message_timeout_secs, 30);
    }

    #[test]
    fn message_timeout_duration() {
        let config = EndpointConfig {
            message_timeout_secs: 5,
            ..EndpointConfig::default()
        };
        assert_eq!(config.message_timeout(), std::time::Duration::from_secs(5));
    }
}
