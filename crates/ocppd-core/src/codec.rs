//! OCPP-J wire codec: one JSON array per text frame.
//!
//! Wire shapes:
//!
//! | Kind       | Array                                              |
//! |------------|----------------------------------------------------|
//! | Call       | `[2, "<id>", "<action>", <payload>]`               |
//! | CallResult | `[3, "<id>", <payload>]`                           |
//! | CallError  | `[4, "<id>", "<code>", "<description>", <details>]`|
//!
//! [`decode`] and [`encode`] are total over [`WireMessage`]: every valid
//! frame decodes to exactly one variant and every variant encodes back to
//! an identical frame.

use serde_json::{Value, json};

use crate::callerror::ErrorCode;
use crate::ids::MessageId;
use crate::message::{MessageType, Outbound};

/// A decoded wire frame, not yet bound to a direction or client.
#[derive(Clone, Debug, PartialEq)]
pub enum WireMessage {
    /// `[2, id, action, payload]`
    Call {
        /// Correlation id.
        id: MessageId,
        /// Remote procedure name.
        action: String,
        /// Structured payload.
        payload: Value,
    },
    /// `[3, id, payload]`
    CallResult {
        /// Correlation id.
        id: MessageId,
        /// Structured payload.
        payload: Value,
    },
    /// `[4, id, code, description, details]`
    CallError {
        /// Correlation id.
        id: MessageId,
        /// Machine-readable error code.
        code: ErrorCode,
        /// Human-readable description.
        description: String,
        /// Free-form detail (empty object when absent on the wire).
        details: Value,
    },
}

impl WireMessage {
    /// Correlation id of the frame.
    #[must_use]
    pub fn id(&self) -> &MessageId {
        match self {
            WireMessage::Call { id, .. }
            | WireMessage::CallResult { id, .. }
            | WireMessage::CallError { id, .. } => id,
        }
    }

    /// Wire message kind.
    #[must_use]
    pub fn message_type(&self) -> MessageType {
        match self {
            WireMessage::Call { .. } => MessageType::Call,
            WireMessage::CallResult { .. } => MessageType::CallResult,
            WireMessage::CallError { .. } => MessageType::CallError,
        }
    }
}

impl From<&Outbound> for WireMessage {
    fn from(message: &Outbound) -> Self {
        match message {
            Outbound::Call(m) => WireMessage::Call {
                id: m.id.clone(),
                action: m.action.clone(),
                payload: m.payload.clone(),
            },
            Outbound::CallResult(m) => WireMessage::CallResult {
                id: m.id.clone(),
                payload: m.payload.clone(),
            },
            Outbound::CallError(m) => WireMessage::CallError {
                id: m.id.clone(),
                code: m.code,
                description: m.description.clone(),
                details: m.details.clone(),
            },
        }
    }
}

/// Frame parse failures. Converted by the transport into an uncorrelated
/// `ProtocolError` CallError; never reaches the handler chain.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// The frame is not valid JSON.
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// The top-level value is not an array.
    #[error("message is not an array")]
    NotAnArray,

    /// Element 0 is missing or not an integer in {2, 3, 4}.
    #[error("missing or invalid message type field")]
    InvalidMessageType,

    /// Element 1 is missing or not a string.
    #[error("missing or invalid id field")]
    InvalidId,

    /// Element 2 of a Call is missing or not a string.
    #[error("missing or invalid action field")]
    InvalidAction,

    /// Elements 2/3 of a CallError are missing or not strings.
    #[error("missing or invalid error code or description field")]
    InvalidErrorFields,

    /// Element 2 of a CallError names no known error code.
    #[error(transparent)]
    UnknownErrorCode(#[from] crate::callerror::UnknownErrorCode),
}

/// Decode one text frame into a [`WireMessage`].
pub fn decode(raw: &str) -> Result<WireMessage, ParseError> {
    let value: Value = serde_json::from_str(raw)?;
    let Value::Array(elements) = value else {
        return Err(ParseError::NotAnArray);
    };

    let message_type = elements
        .first()
        .and_then(Value::as_u64)
        .and_then(MessageType::from_tag)
        .ok_or(ParseError::InvalidMessageType)?;

    let id = elements
        .get(1)
        .and_then(Value::as_str)
        .map(MessageId::from)
        .ok_or(ParseError::InvalidId)?;

    match message_type {
        MessageType::Call => {
            let action = elements
                .get(2)
                .and_then(Value::as_str)
                .ok_or(ParseError::InvalidAction)?
                .to_owned();
            let payload = elements.get(3).cloned().unwrap_or_else(|| json!({}));
            Ok(WireMessage::Call {
                id,
                action,
                payload,
            })
        }
        MessageType::CallResult => {
            let payload = elements.get(2).cloned().unwrap_or_else(|| json!({}));
            Ok(WireMessage::CallResult { id, payload })
        }
        MessageType::CallError => {
            let code = elements
                .get(2)
                .and_then(Value::as_str)
                .ok_or(ParseError::InvalidErrorFields)?
                .parse::<ErrorCode>()?;
            let description = elements
                .get(3)
                .and_then(Value::as_str)
                .ok_or(ParseError::InvalidErrorFields)?
                .to_owned();
            let details = match elements.get(4) {
                None | Some(Value::Null) => json!({}),
                Some(details) => details.clone(),
            };
            Ok(WireMessage::CallError {
                id,
                code,
                description,
                details,
            })
        }
    }
}

/// Encode a [`WireMessage`] into a text frame.
#[must_use]
pub fn encode(message: &WireMessage) -> String {
    let array = match message {
        WireMessage::Call {
            id,
            action,
            payload,
        } => json!([2, id, action, payload]),
        WireMessage::CallResult { id, payload } => json!([3, id, payload]),
        WireMessage::CallError {
            id,
            code,
            description,
            details,
        } => json!([4, id, code, description, details]),
    };
    array.to_string()
}
