//! # ocppd-ws
//!
//! WebSocket transport for an `ocppd-engine` endpoint.
//!
//! - Upgrade handshake parsing and rejection ([`upgrade`])
//! - Per-connection write task, sequential read loop and parse-error
//!   handling ([`connection`])
//! - Ping/pong liveness monitoring ([`heartbeat`])
//! - Optional payload schema validation ([`schema`])
//! - The axum-backed [`transport::WsTransport`]

#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod heartbeat;
pub mod schema;
pub mod transport;
pub mod upgrade;

pub use config::WsConfig;
pub use connection::Connection;
pub use heartbeat::HeartbeatResult;
pub use schema::{OutboundSchemaValidation, PayloadKind, SchemaValidator};
pub use transport::WsTransport;
pub use upgrade::{Credentials, Handshake, UpgradeError};
