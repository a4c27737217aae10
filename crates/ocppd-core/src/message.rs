//! The three OCPP-J message kinds with their Inbound/Outbound orientation.
//!
//! Each wire message is one of Call, CallResult, or CallError, and is either
//! inbound (carries its sender) or outbound (carries its recipient and a
//! sent flag). The [`Inbound`] and [`Outbound`] enums are closed over the
//! variant set, so dispatch is exhaustive pattern matching rather than
//! runtime type tests.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::call::{InboundCall, OutboundCall};
use crate::callerror::{InboundCallError, OutboundCallError};
use crate::callresult::{InboundCallResult, OutboundCallResult};
use crate::ids::{ClientId, MessageId};

/// Wire tag of a message (element 0 of the OCPP-J array).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// A request in either direction (`[2, id, action, payload]`).
    Call,
    /// A success response (`[3, id, payload]`).
    CallResult,
    /// A failure response (`[4, id, code, description, details]`).
    CallError,
}

impl MessageType {
    /// The numeric wire tag.
    #[must_use]
    pub fn tag(self) -> u8 {
        match self {
            MessageType::Call => 2,
            MessageType::CallResult => 3,
            MessageType::CallError => 4,
        }
    }

    /// Parse a numeric wire tag.
    #[must_use]
    pub fn from_tag(tag: u64) -> Option<Self> {
        match tag {
            2 => Some(MessageType::Call),
            3 => Some(MessageType::CallResult),
            4 => Some(MessageType::CallError),
            _ => None,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::Call => "CALL",
            MessageType::CallResult => "CALLRESULT",
            MessageType::CallError => "CALLERROR",
        };
        f.write_str(name)
    }
}

/// Sent-state of an outbound message.
///
/// The timestamp is set at send completion, not at construction.
#[derive(Debug, Default)]
pub struct SendState {
    sent: AtomicBool,
    sent_at: Mutex<Option<DateTime<Utc>>>,
}

impl SendState {
    /// Mark the message as sent, recording the send timestamp.
    ///
    /// Returns `false` if it was already marked.
    pub fn mark_sent(&self) -> bool {
        if self.sent.swap(true, Ordering::SeqCst) {
            return false;
        }
        *self.sent_at.lock() = Some(Utc::now());
        true
    }

    /// Whether the message has been sent.
    pub fn is_sent(&self) -> bool {
        self.sent.load(Ordering::SeqCst)
    }

    /// When the message was sent, if it has been.
    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        *self.sent_at.lock()
    }
}

/// A message received from a client.
#[derive(Clone, Debug)]
pub enum Inbound {
    /// An inbound request awaiting this endpoint's response.
    Call(Arc<InboundCall>),
    /// A success response to a prior outbound Call.
    CallResult(Arc<InboundCallResult>),
    /// A failure response to a prior outbound Call.
    CallError(Arc<InboundCallError>),
}

impl Inbound {
    /// Correlation id.
    #[must_use]
    pub fn id(&self) -> &MessageId {
        match self {
            Inbound::Call(m) => &m.id,
            Inbound::CallResult(m) => &m.id,
            Inbound::CallError(m) => &m.id,
        }
    }

    /// The client that sent this message.
    #[must_use]
    pub fn sender(&self) -> &ClientId {
        match self {
            Inbound::Call(m) => &m.sender,
            Inbound::CallResult(m) => &m.sender,
            Inbound::CallError(m) => &m.sender,
        }
    }

    /// Wire message kind.
    #[must_use]
    pub fn message_type(&self) -> MessageType {
        match self {
            Inbound::Call(_) => MessageType::Call,
            Inbound::CallResult(_) => MessageType::CallResult,
            Inbound::CallError(_) => MessageType::CallError,
        }
    }

    /// When the message was received.
    #[must_use]
    pub fn received_at(&self) -> DateTime<Utc> {
        match self {
            Inbound::Call(m) => m.received_at,
            Inbound::CallResult(m) => m.received_at,
            Inbound::CallError(m) => m.received_at,
        }
    }

    /// Whether this is a Call (as opposed to a response).
    #[must_use]
    pub fn is_call(&self) -> bool {
        matches!(self, Inbound::Call(_))
    }
}

/// A message to be sent to a client.
#[derive(Clone, Debug)]
pub enum Outbound {
    /// An outbound request awaiting the client's response.
    Call(Arc<OutboundCall>),
    /// A success response to a prior inbound Call.
    CallResult(Arc<OutboundCallResult>),
    /// A failure response, correlated or (for parse failures) fresh.
    CallError(Arc<OutboundCallError>),
}

impl Outbound {
    /// Correlation id.
    #[must_use]
    pub fn id(&self) -> &MessageId {
        match self {
            Outbound::Call(m) => &m.id,
            Outbound::CallResult(m) => &m.id,
            Outbound::CallError(m) => &m.id,
        }
    }

    /// The client this message is addressed to.
    #[must_use]
    pub fn recipient(&self) -> &ClientId {
        match self {
            Outbound::Call(m) => &m.recipient,
            Outbound::CallResult(m) => &m.recipient,
            Outbound::CallError(m) => &m.recipient,
        }
    }

    /// Wire message kind.
    #[must_use]
    pub fn message_type(&self) -> MessageType {
        match self {
            Outbound::Call(_) => MessageType::Call,
            Outbound::CallResult(_) => MessageType::CallResult,
            Outbound::CallError(_) => MessageType::CallError,
        }
    }

    /// Whether this is a Call (as opposed to a response).
    #[must_use]
    pub fn is_call(&self) -> bool {
        matches!(self, Outbound::Call(_))
    }

    fn send_state(&self) -> &SendState {
        match self {
            Outbound::Call(m) => &m.send_state,
            Outbound::CallResult(m) => &m.send_state,
            Outbound::CallError(m) => &m.send_state,
        }
    }

    /// Mark the message as sent (timestamp is recorded at send completion).
    pub fn mark_sent(&self) -> bool {
        self.send_state().mark_sent()
    }

    /// Whether the message has been sent.
    #[must_use]
    pub fn is_sent(&self) -> bool {
        self.send_state().is_sent()
    }

    /// When the message was sent, if it has been.
    #[must_use]
    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        self.send_state().sent_at()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_round_trip() {
        for mt in [
            MessageType::Call,
            MessageType::CallResult,
            MessageType::CallError,
        ] {
            assert_eq!(MessageType::from_tag(u64::from(mt.tag())), Some(mt));
        }
    }

    #[test]
    fn unknown_tag_rejected() {
        assert_eq!(MessageType::from_tag(1), None);
        assert_eq!(MessageType::from_tag(5), None);
    }

    #[test]
    fn display_names() {
        assert_eq!(format!("{}", MessageType::Call), "CALL");
        assert_eq!(format!("{}", MessageType::CallError), "CALLERROR");
    }

    #[test]
    fn send_state_marks_once() {
        let state = SendState::default();
        assert!(!state.is_sent());
        assert!(state.sent_at().is_none());

        assert!(state.mark_sent());
        assert!(state.is_sent());
        assert!(state.sent_at().is_some());

        // Second mark is a no-op
        assert!(!state.mark_sent());
    }
}
