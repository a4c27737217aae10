//! CallError messages and the fixed wire-level error code enumeration.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{ClientId, MessageId};
use crate::message::SendState;

/// Wire-level RPC error codes (fixed enumeration, OCPP-J).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Payload is syntactically incorrect.
    FormatViolation,
    /// Any other error not covered by a more specific code.
    GenericError,
    /// Internal failure while processing an otherwise valid message.
    InternalError,
    /// Message type number is not supported.
    MessageTypeNotSupported,
    /// Requested action is recognized but not implemented.
    NotImplemented,
    /// Requested action is not known by the receiver.
    NotSupported,
    /// Payload violates occurrence constraints.
    OccurrenceConstraintViolation,
    /// Payload violates value constraints.
    PropertyConstraintViolation,
    /// Message violates the OCPP-J protocol rules.
    ProtocolError,
    /// Error in the RPC framework itself.
    RpcFrameworkError,
    /// Sender is not authorized for this action.
    SecurityError,
    /// Payload violates data type constraints.
    TypeConstraintViolation,
}

impl ErrorCode {
    /// All codes, in wire-name order.
    pub const ALL: [ErrorCode; 12] = [
        ErrorCode::FormatViolation,
        ErrorCode::GenericError,
        ErrorCode::InternalError,
        ErrorCode::MessageTypeNotSupported,
        ErrorCode::NotImplemented,
        ErrorCode::NotSupported,
        ErrorCode::OccurrenceConstraintViolation,
        ErrorCode::PropertyConstraintViolation,
        ErrorCode::ProtocolError,
        ErrorCode::RpcFrameworkError,
        ErrorCode::SecurityError,
        ErrorCode::TypeConstraintViolation,
    ];

    /// The PascalCase name used on the wire.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::FormatViolation => "FormatViolation",
            ErrorCode::GenericError => "GenericError",
            ErrorCode::InternalError => "InternalError",
            ErrorCode::MessageTypeNotSupported => "MessageTypeNotSupported",
            ErrorCode::NotImplemented => "NotImplemented",
            ErrorCode::NotSupported => "NotSupported",
            ErrorCode::OccurrenceConstraintViolation => "OccurrenceConstraintViolation",
            ErrorCode::PropertyConstraintViolation => "PropertyConstraintViolation",
            ErrorCode::ProtocolError => "ProtocolError",
            ErrorCode::RpcFrameworkError => "RpcFrameworkError",
            ErrorCode::SecurityError => "SecurityError",
            ErrorCode::TypeConstraintViolation => "TypeConstraintViolation",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a wire string is not a known error code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown RPC error code: {0}")]
pub struct UnknownErrorCode(pub String);

impl FromStr for ErrorCode {
    type Err = UnknownErrorCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ErrorCode::ALL
            .into_iter()
            .find(|code| code.as_str() == s)
            .ok_or_else(|| UnknownErrorCode(s.to_owned()))
    }
}

/// A failure response received from a client.
#[derive(Debug)]
pub struct InboundCallError {
    /// The client that sent the error.
    pub sender: ClientId,
    /// Correlation id of the Call being answered.
    pub id: MessageId,
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub description: String,
    /// Free-form structured detail.
    pub details: Value,
    /// When the error was received.
    pub received_at: DateTime<Utc>,
}

impl InboundCallError {
    /// Create an inbound call error.
    pub fn new(
        sender: ClientId,
        id: MessageId,
        code: ErrorCode,
        description: impl Into<String>,
        details: Value,
    ) -> Self {
        Self {
            sender,
            id,
            code,
            description: description.into(),
            details,
            received_at: Utc::now(),
        }
    }
}

/// A failure response to be sent to a client.
#[derive(Debug)]
pub struct OutboundCallError {
    /// The client this error is addressed to.
    pub recipient: ClientId,
    /// Correlation id; fresh when no correlation is possible.
    pub id: MessageId,
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub description: String,
    /// Free-form structured detail.
    pub details: Value,
    /// Sent flag and send timestamp.
    pub send_state: SendState,
}

impl OutboundCallError {
    /// Create an outbound call error.
    pub fn new(
        recipient: ClientId,
        id: MessageId,
        code: ErrorCode,
        description: impl Into<String>,
        details: Value,
    ) -> Self {
        Self {
            recipient,
            id,
            code,
            description: description.into(),
            details,
            send_state: SendState::default(),
        }
    }
}
