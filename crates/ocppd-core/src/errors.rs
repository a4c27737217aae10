//! Core error types.
//!
//! These are local invariant violations in the message model (double
//! respond, duplicate response delivery). They indicate a bug in the
//! calling handler and are never converted into wire-level errors.

use crate::ids::MessageId;

/// Errors raised by the message model.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// `respond()` was called on an inbound call that was already responded to.
    #[error("call {0} has already been responded to")]
    AlreadyResponded(MessageId),

    /// A response was delivered for an outbound call that already has one.
    #[error("outbound call {0} already has a response")]
    AlreadyResolved(MessageId),

    /// The pending outbound call was abandoned (e.g. message timeout)
    /// before a response arrived.
    #[error("outbound call {0} was abandoned before a response arrived")]
    Abandoned(MessageId),

    /// An outbound Call was passed where a CallResult/CallError response
    /// was expected.
    #[error("message {0} is not a valid response (must be CallResult or CallError)")]
    NotAResponse(MessageId),

    /// The response sink failed to deliver the message.
    #[error("failed to send response for call {id}: {reason}")]
    Send {
        /// Correlation id of the call being responded to.
        id: MessageId,
        /// Transport-reported failure.
        reason: String,
    },
}
