//! Per-connection session state and the synchronicity rules.
//!
//! OCPP-J allows at most one outstanding Call per direction per connection;
//! correlation is by id alone, with no pipelining. Both pending-call slots
//! live behind a single mutex, and every check is fused with its update
//! under that lock, so concurrent inbound processing and outbound sends on
//! the same session cannot produce a lost update.
//!
//! External code never mutates the slots directly: mutation happens only
//! through [`Session::accept_inbound`], [`Session::record_outbound`] and
//! the abandonment operations, all of which take the same lock.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use ocppd_core::{ClientId, Inbound, InboundCall, MessageId, Outbound, OutboundCall, ProtocolVersion};
use parking_lot::Mutex;

/// A violation of the one-pending-call-per-direction rule.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncViolation {
    /// A response arrived whose id does not match the pending outbound Call.
    #[error("Message is out of sync with pending outbound call {pending}")]
    OutOfSync {
        /// Id of the Call still awaiting its response.
        pending: MessageId,
        /// Id carried by the offending response.
        received: MessageId,
    },

    /// A response arrived while no outbound Call is pending.
    #[error("Received a response while there is no pending outbound call")]
    NoPendingCall,

    /// A Call arrived while a previous inbound Call is still unanswered.
    #[error("Received a call while a previous inbound call is still pending")]
    InboundCallPending,

    /// A second outbound Call was issued while one is still pending.
    #[error("An outbound call ({pending}) is already pending for client {client}")]
    OutboundCallPending {
        /// Recipient of the rejected Call.
        client: ClientId,
        /// Id of the Call still awaiting its response.
        pending: MessageId,
    },
}

#[derive(Default)]
struct PendingCalls {
    inbound: Option<Arc<InboundCall>>,
    outbound: Option<Arc<OutboundCall>>,
}

/// State for one connected client, for the lifetime of the connection.
///
/// Created on successful authentication, destroyed on disconnect.
pub struct Session {
    client: ClientId,
    protocol: ProtocolVersion,
    connected_at: DateTime<Utc>,
    pending: Mutex<PendingCalls>,
}

impl Session {
    /// Create a session for an authenticated client.
    #[must_use]
    pub fn new(client: ClientId, protocol: ProtocolVersion) -> Self {
        Self {
            client,
            protocol,
            connected_at: Utc::now(),
            pending: Mutex::new(PendingCalls::default()),
        }
    }

    /// The client this session belongs to.
    #[must_use]
    pub fn client(&self) -> &ClientId {
        &self.client
    }

    /// The protocol version negotiated during the handshake.
    #[must_use]
    pub fn protocol(&self) -> ProtocolVersion {
        self.protocol
    }

    /// When the session was established.
    #[must_use]
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Snapshot of the inbound Call awaiting this endpoint's response.
    #[must_use]
    pub fn pending_inbound(&self) -> Option<Arc<InboundCall>> {
        self.pending.lock().inbound.clone()
    }

    /// Snapshot of the outbound Call awaiting the client's response.
    #[must_use]
    pub fn pending_outbound(&self) -> Option<Arc<OutboundCall>> {
        self.pending.lock().outbound.clone()
    }

    /// Inbound-side check and update, atomic under the session lock.
    ///
    /// Rules:
    /// 1. A non-Call with an id other than the pending outbound Call's is
    ///    out of sync.
    /// 2. A non-Call with no outbound Call pending is out of sync.
    /// 3. A Call while an inbound Call is pending is out of sync.
    ///
    /// An inbound Call is permitted while an outbound Call is pending; the
    /// two directions are independent.
    ///
    /// On success, a matching response clears the pending outbound slot and
    /// the cleared Call is returned so the caller can deliver the response
    /// to its future outside the lock; a Call occupies the inbound slot.
    pub(crate) fn accept_inbound(
        &self,
        message: &Inbound,
    ) -> Result<Option<Arc<OutboundCall>>, SyncViolation> {
        let mut pending = self.pending.lock();

        match message {
            Inbound::Call(call) => {
                if pending.inbound.is_some() {
                    return Err(SyncViolation::InboundCallPending);
                }
                pending.inbound = Some(call.clone());
                Ok(None)
            }
            Inbound::CallResult(_) | Inbound::CallError(_) => {
                let Some(outbound) = &pending.outbound else {
                    return Err(SyncViolation::NoPendingCall);
                };
                if outbound.id != *message.id() {
                    return Err(SyncViolation::OutOfSync {
                        pending: outbound.id.clone(),
                        received: message.id().clone(),
                    });
                }
                Ok(pending.outbound.take())
            }
        }
    }

    /// Outbound-side update, the mirror of [`Self::accept_inbound`].
    ///
    /// A response matching the pending inbound Call clears that slot; a
    /// Call occupies the outbound slot, or is rejected when one is already
    /// pending.
    pub(crate) fn record_outbound(&self, message: &Outbound) -> Result<(), SyncViolation> {
        let mut pending = self.pending.lock();

        match message {
            Outbound::Call(call) => {
                if let Some(existing) = &pending.outbound {
                    return Err(SyncViolation::OutboundCallPending {
                        client: self.client.clone(),
                        pending: existing.id.clone(),
                    });
                }
                pending.outbound = Some(call.clone());
                Ok(())
            }
            Outbound::CallResult(_) | Outbound::CallError(_) => {
                if pending
                    .inbound
                    .as_ref()
                    .is_some_and(|call| call.id == *message.id())
                {
                    pending.inbound = None;
                }
                Ok(())
            }
        }
    }

    /// Clear the pending outbound Call if its id matches (message timeout).
    ///
    /// Goes through the same lock as every other update. The cleared Call
    /// is returned so the caller can abandon its response future.
    pub(crate) fn abandon_outbound(&self, id: &MessageId) -> Option<Arc<OutboundCall>> {
        let mut pending = self.pending.lock();
        if pending.outbound.as_ref().is_some_and(|call| call.id == *id) {
            pending.outbound.take()
        } else {
            None
        }
    }

    /// Clear the pending outbound Call unconditionally (disconnect).
    pub(crate) fn take_pending_outbound(&self) -> Option<Arc<OutboundCall>> {
        self.pending.lock().outbound.take()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pending = self.pending.lock();
        f.debug_struct("Session")
            .field("client", &self.client)
            .field("protocol", &self.protocol)
            .field("pending_inbound", &pending.inbound.as_ref().map(|c| &c.id))
            .field("pending_outbound", &pending.outbound.as_ref().map(|c| &c.id))
            .finish_non_exhaustive()
    }
}
