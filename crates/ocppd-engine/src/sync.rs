//! Synchronicity stages: enforce one outstanding Call per direction.

use std::sync::Arc;

use async_trait::async_trait;
use ocppd_core::{ErrorCode, Inbound, Outbound, OutboundCallError};
use serde_json::json;
use tracing::{debug, warn};

use crate::chain::{Flow, Stage};
use crate::errors::EngineError;
use crate::session::SyncViolation;
use crate::store::SessionStore;

/// Inbound check-and-update stage.
///
/// Runs before any business stage: an out-of-sync message raises a
/// correlated `ProtocolError` CallError and aborts the chain, so business
/// handlers never see it. A response matching the pending outbound Call
/// clears the pending slot and resolves that Call's response future.
pub struct InboundSynchronicity {
    store: Arc<SessionStore>,
}

impl InboundSynchronicity {
    /// Create the stage over the shared session store.
    #[must_use]
    pub fn new(store: Arc<SessionStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Stage<Inbound> for InboundSynchronicity {
    async fn handle(&self, message: &Inbound) -> Result<Flow, EngineError> {
        let session = self.store.get(message.sender())?;

        match session.accept_inbound(message) {
            Ok(Some(resolved)) => {
                debug!(
                    client = %message.sender(),
                    id = %message.id(),
                    "response received for pending outbound call"
                );
                if let Err(err) = resolved.deliver_response(message.clone()) {
                    // The caller stopped waiting (timeout); the slot is
                    // already cleared, so the response is simply late.
                    warn!(client = %message.sender(), id = %message.id(), %err,
                        "response arrived but no one is waiting");
                }
                Ok(Flow::Continue)
            }
            Ok(None) => Ok(Flow::Continue),
            Err(violation) => {
                warn!(
                    client = %message.sender(),
                    id = %message.id(),
                    message_type = %message.message_type(),
                    %violation,
                    "inbound message is out of sync"
                );
                Err(EngineError::CallError(Arc::new(OutboundCallError::new(
                    message.sender().clone(),
                    message.id().clone(),
                    ErrorCode::ProtocolError,
                    violation.to_string(),
                    json!({ "messageType": message.message_type().tag() }),
                ))))
            }
        }
    }
}

/// Outbound update stage.
///
/// A response clears the matching pending inbound Call; a Call occupies
/// the pending outbound slot, or rejects the send when one is already
/// pending.
pub struct OutboundSynchronicity {
    store: Arc<SessionStore>,
}

impl OutboundSynchronicity {
    /// Create the stage over the shared session store.
    #[must_use]
    pub fn new(store: Arc<SessionStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Stage<Outbound> for OutboundSynchronicity {
    async fn handle(&self, message: &Outbound) -> Result<Flow, EngineError> {
        let session = self.store.get(message.recipient())?;

        session.record_outbound(message).map_err(|violation| {
            warn!(client = %message.recipient(), id = %message.id(), %violation,
                "outbound send rejected");
            match violation {
                SyncViolation::OutboundCallPending { client, pending } => {
                    EngineError::CallAlreadyPending { client, pending }
                }
                // record_outbound only raises OutboundCallPending today;
                // anything else is an engine bug worth surfacing loudly.
                other => EngineError::Transport(other.to_string()),
            }
        })?;
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use ocppd_core::{
        ClientId, InboundCall, InboundCallResult, MessageId, OutboundCall, ProtocolVersion,
        ResponseSink,
    };

    use crate::session::Session;

    fn noop_sink() -> ResponseSink {
        Arc::new(|_| Box::pin(async { Ok(()) }))
    }

    fn store_with_session(id: &str) -> Arc<SessionStore> {
        let store = Arc::new(SessionStore::new());
        store
            .add(Arc::new(Session::new(
                ClientId::from(id),
                ProtocolVersion::Ocpp16,
            )))
            .unwrap();
        store
    }

    fn inbound_call(client: &str, id: &str) -> Inbound {
        Inbound::Call(InboundCall::new(
            ClientId::from(client),
            MessageId::from(id),
            "Heartbeat",
            json!({}),
            noop_sink(),
        ))
    }

    fn inbound_result(client: &str, id: &str) -> Inbound {
        Inbound::CallResult(Arc::new(InboundCallResult::new(
            ClientId::from(client),
            MessageId::from(id),
            json!({}),
        )))
    }

    #[tokio::test]
    async fn call_passes_and_occupies_slot() {
        let store = store_with_session("CP001");
        let stage = InboundSynchronicity::new(store.clone());

        let flow = stage.handle(&inbound_call("CP001", "1")).await.unwrap();
        assert_eq!(flow, Flow::Continue);

        let session = store.get(&ClientId::from("CP001")).unwrap();
        assert!(session.pending_inbound().is_some());
    }

    #[tokio::test]
    async fn out_of_sync_response_raises_protocol_error() {
        let store = store_with_session("CP001");
        let session = store.get(&ClientId::from("CP001")).unwrap();
        let (call, _future) = OutboundCall::new(
            ClientId::from("CP001"),
            MessageId::from("abc"),
            "Reset",
            json!({}),
        );
        session.record_outbound(&Outbound::Call(call)).unwrap();

        let stage = InboundSynchronicity::new(store);
        let err = stage
            .handle(&inbound_result("CP001", "xyz"))
            .await
            .unwrap_err();
        assert_matches!(err, EngineError::CallError(error) => {
            assert_eq!(error.code, ErrorCode::ProtocolError);
            assert_eq!(error.id.as_str(), "xyz");
            assert!(error.description.contains("out of sync"));
        });
    }

    #[tokio::test]
    async fn response_without_pending_call_raises_protocol_error() {
        let store = store_with_session("CP001");
        let stage = InboundSynchronicity::new(store);

        let err = stage
            .handle(&inbound_result("CP001", "xyz"))
            .await
            .unwrap_err();
        assert_matches!(err, EngineError::CallError(error) => {
            assert_eq!(error.code, ErrorCode::ProtocolError);
            assert!(error.description.contains("no pending outbound call"));
        });
    }

    #[tokio::test]
    async fn matching_response_resolves_future() {
        let store = store_with_session("CP001");
        let session = store.get(&ClientId::from("CP001")).unwrap();
        let (call, future) = OutboundCall::new(
            ClientId::from("CP001"),
            MessageId::from("abc"),
            "Reset",
            json!({}),
        );
        session.record_outbound(&Outbound::Call(call)).unwrap();

        let stage = InboundSynchronicity::new(store);
        let flow = stage.handle(&inbound_result("CP001", "abc")).await.unwrap();
        assert_eq!(flow, Flow::Continue);

        let response = future.wait().await.unwrap();
        assert_eq!(response.id().as_str(), "abc");
        assert!(session.pending_outbound().is_none());
    }

    #[tokio::test]
    async fn unknown_sender_fails() {
        let store = Arc::new(SessionStore::new());
        let stage = InboundSynchronicity::new(store);

        let err = stage.handle(&inbound_call("CP404", "1")).await.unwrap_err();
        assert_matches!(err, EngineError::NotConnected(_));
    }

    #[tokio::test]
    async fn second_outbound_call_rejected() {
        let store = store_with_session("CP001");
        let stage = OutboundSynchronicity::new(store);

        let (first, _f1) = OutboundCall::new(
            ClientId::from("CP001"),
            MessageId::from("abc"),
            "Reset",
            json!({}),
        );
        let flow = stage.handle(&Outbound::Call(first)).await.unwrap();
        assert_eq!(flow, Flow::Continue);

        let (second, _f2) = OutboundCall::new(
            ClientId::from("CP001"),
            MessageId::from("def"),
            "Reset",
            json!({}),
        );
        let err = stage.handle(&Outbound::Call(second)).await.unwrap_err();
        assert_matches!(err, EngineError::CallAlreadyPending { pending, .. } => {
            assert_eq!(pending.as_str(), "abc");
        });
    }

    #[tokio::test]
    async fn outbound_response_clears_pending_inbound() {
        let store = store_with_session("CP001");
        let session = store.get(&ClientId::from("CP001")).unwrap();
        let _ = session
            .accept_inbound(&inbound_call("CP001", "42"))
            .unwrap();

        let stage = OutboundSynchronicity::new(store);
        let response = Outbound::CallResult(Arc::new(ocppd_core::OutboundCallResult::new(
            ClientId::from("CP001"),
            MessageId::from("42"),
            json!({}),
        )));
        let _ = stage.handle(&response).await.unwrap();
        assert!(session.pending_inbound().is_none());
    }
}
