//! CallResult messages: success responses correlated by id.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::ids::{ClientId, MessageId};
use crate::message::SendState;

/// A success response received from a client, correlated to a prior
/// outbound Call by shared id.
#[derive(Debug)]
pub struct InboundCallResult {
    /// The client that sent the response.
    pub sender: ClientId,
    /// Correlation id of the Call being answered.
    pub id: MessageId,
    /// Structured payload.
    pub payload: Value,
    /// When the response was received.
    pub received_at: DateTime<Utc>,
}

impl InboundCallResult {
    /// Create an inbound call result.
    pub fn new(sender: ClientId, id: MessageId, payload: Value) -> Self {
        Self {
            sender,
            id,
            payload,
            received_at: Utc::now(),
        }
    }
}

/// A success response to be sent to a client, correlated to a prior
/// inbound Call by shared id.
#[derive(Debug)]
pub struct OutboundCallResult {
    /// The client this response is addressed to.
    pub recipient: ClientId,
    /// Correlation id of the Call being answered.
    pub id: MessageId,
    /// Structured payload.
    pub payload: Value,
    /// Sent flag and send timestamp.
    pub send_state: SendState,
}

impl OutboundCallResult {
    /// Create an outbound call result.
    pub fn new(recipient: ClientId, id: MessageId, payload: Value) -> Self {
        Self {
            recipient,
            id,
            payload,
            send_state: SendState::default(),
        }
    }
}
