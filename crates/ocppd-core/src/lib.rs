//! # ocppd-core
//!
//! OCPP-J message model and wire codec.
//!
//! - Typed Call / CallResult / CallError messages with Inbound/Outbound
//!   orientation ([`message`], [`call`], [`callresult`], [`callerror`])
//! - Respondable inbound calls and promise-style outbound calls ([`call`])
//! - OCPP-J array codec ([`codec`])
//! - Fixed wire error-code enumeration ([`callerror::ErrorCode`])
//! - Branded id newtypes ([`ids`]) and protocol versions ([`protocol`])

#![deny(unsafe_code)]

pub mod call;
pub mod callerror;
pub mod callresult;
pub mod codec;
pub mod errors;
pub mod ids;
pub mod message;
pub mod protocol;

pub use call::{InboundCall, OutboundCall, ResponseFuture, ResponseSink};
pub use callerror::{ErrorCode, InboundCallError, OutboundCallError};
pub use callresult::{InboundCallResult, OutboundCallResult};
pub use codec::{ParseError, WireMessage, decode, encode};
pub use errors::CoreError;
pub use ids::{ClientId, MessageId};
pub use message::{Inbound, MessageType, Outbound};
pub use protocol::ProtocolVersion;
