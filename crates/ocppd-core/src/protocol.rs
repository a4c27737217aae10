//! OCPP protocol sub-versions negotiated as WebSocket subprotocols.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An OCPP protocol sub-version, as offered in the
/// `Sec-WebSocket-Protocol` header during the connection handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolVersion {
    /// OCPP 1.2
    #[serde(rename = "ocpp1.2")]
    Ocpp12,
    /// OCPP 1.5
    #[serde(rename = "ocpp1.5")]
    Ocpp15,
    /// OCPP 1.6
    #[serde(rename = "ocpp1.6")]
    Ocpp16,
    /// OCPP 2.0
    #[serde(rename = "ocpp2.0")]
    Ocpp20,
    /// OCPP 2.0.1
    #[serde(rename = "ocpp2.0.1")]
    Ocpp201,
}

impl ProtocolVersion {
    /// All known versions, oldest first.
    pub const ALL: [ProtocolVersion; 5] = [
        ProtocolVersion::Ocpp12,
        ProtocolVersion::Ocpp15,
        ProtocolVersion::Ocpp16,
        ProtocolVersion::Ocpp20,
        ProtocolVersion::Ocpp201,
    ];

    /// The subprotocol name used on the wire.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ProtocolVersion::Ocpp12 => "ocpp1.2",
            ProtocolVersion::Ocpp15 => "ocpp1.5",
            ProtocolVersion::Ocpp16 => "ocpp1.6",
            ProtocolVersion::Ocpp20 => "ocpp2.0",
            ProtocolVersion::Ocpp201 => "ocpp2.0.1",
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a subprotocol name is not a known version.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown OCPP protocol version: {0}")]
pub struct UnknownProtocolVersion(pub String);

impl FromStr for ProtocolVersion {
    type Err = UnknownProtocolVersion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProtocolVersion::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| UnknownProtocolVersion(s.to_owned()))
    }
}
