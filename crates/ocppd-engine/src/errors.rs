//! Engine error types.

use std::sync::Arc;

use ocppd_core::{ClientId, CoreError, MessageId, OutboundCallError};

/// Errors raised by the session engine and endpoint.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A chain stage rejected the message with a wire-level error that must
    /// be sent back to the offending client.
    #[error("protocol violation ({}): {}", .0.code, .0.description)]
    CallError(Arc<OutboundCallError>),

    /// A second outbound Call was issued while one is still pending.
    #[error("an outbound call ({pending}) is already pending for client {client}")]
    CallAlreadyPending {
        /// Recipient of the rejected send.
        client: ClientId,
        /// Id of the Call still awaiting its response.
        pending: MessageId,
    },

    /// A session for this client identity already exists.
    #[error("client with id {0} is already connected")]
    AlreadyConnected(ClientId),

    /// No session exists for this client identity.
    #[error("client with id {0} is currently not connected")]
    NotConnected(ClientId),

    /// `listen()` was called while already listening.
    #[error("endpoint is already listening for connections")]
    AlreadyListening,

    /// An operation requiring a listening endpoint was called while stopped.
    #[error("endpoint is currently not listening for connections")]
    NotListening,

    /// `accept()`/`reject()` was called on an authentication request that
    /// was already decided.
    #[error("authentication attempt from client {client} has already been {decision}")]
    AlreadyDecided {
        /// The candidate client identity.
        client: ClientId,
        /// `"accepted"` or `"rejected"`.
        decision: &'static str,
    },

    /// `accept()` with no explicit protocol, but the request offered none.
    #[error("client {0} offered no protocol version to accept")]
    NoProtocolOffered(ClientId),

    /// Message model invariant violation surfaced through a stage.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The transport adapter failed.
    #[error("transport error: {0}")]
    Transport(String),
}
