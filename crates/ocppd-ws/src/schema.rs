//! Payload schema validation at the transport boundary.
//!
//! Schema loading and the validation engine stay external: callers plug a
//! [`SchemaValidator`] into the transport, keyed by action, payload kind
//! and protocol version. Inbound Call payloads that fail block the chain
//! with a correlated `FormatViolation`; inbound response payloads that
//! fail are dropped with a warning; outbound Calls that fail never reach
//! the wire.

use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use ocppd_core::{
    ClientId, ErrorCode, Outbound, OutboundCallError, ProtocolVersion, WireMessage,
};
use ocppd_engine::{EngineError, Flow, Session, Stage};
use serde_json::{Value, json};
use tracing::warn;

/// Which half of an action's exchange a payload belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    /// The Call payload.
    Request,
    /// The CallResult payload.
    Response,
}

/// Validates payloads against externally loaded schemas.
pub trait SchemaValidator: Send + Sync {
    /// Check a payload; `Err` carries a human-readable reason.
    ///
    /// Unknown (action, kind, protocol) combinations should pass: absence
    /// of a schema is not a violation.
    fn validate(
        &self,
        action: &str,
        kind: PayloadKind,
        protocol: ProtocolVersion,
        payload: &Value,
    ) -> Result<(), String>;
}

/// What the read loop should do with an inbound frame after validation.
#[derive(Debug)]
pub(crate) enum InboundVerdict {
    /// Payload conforms (or nothing applies); process normally.
    Pass,
    /// Call payload is invalid; answer with this error, skip the chain.
    Reject(Arc<OutboundCallError>),
    /// Response payload is invalid; discard the frame.
    Drop,
}

/// Validate a decoded inbound frame before it enters the chain.
///
/// Responses are validated against the schema of the pending outbound
/// Call's action; the lookup must happen before correlation clears the
/// pending slot, which is why this runs in the read loop rather than as
/// a chain stage.
pub(crate) fn check_inbound(
    validator: &dyn SchemaValidator,
    session: &Session,
    client: &ClientId,
    frame: &WireMessage,
) -> InboundVerdict {
    match frame {
        WireMessage::Call { id, action, payload } => {
            match validator.validate(action, PayloadKind::Request, session.protocol(), payload) {
                Ok(()) => InboundVerdict::Pass,
                Err(reason) => {
                    warn!(client = %client, %action, %reason, "call payload failed validation");
                    counter!("ws_schema_violations_total").increment(1);
                    InboundVerdict::Reject(Arc::new(OutboundCallError::new(
                        client.clone(),
                        id.clone(),
                        ErrorCode::FormatViolation,
                        reason,
                        json!({ "action": action }),
                    )))
                }
            }
        }
        WireMessage::CallResult { id, payload } => {
            let Some(pending) = session.pending_outbound() else {
                // No pending call to name the schema; synchronicity will
                // refuse the frame anyway.
                return InboundVerdict::Pass;
            };
            if pending.id != *id {
                return InboundVerdict::Pass;
            }
            match validator.validate(
                &pending.action,
                PayloadKind::Response,
                session.protocol(),
                payload,
            ) {
                Ok(()) => InboundVerdict::Pass,
                Err(reason) => {
                    warn!(client = %client, action = %pending.action, %reason,
                        "response payload failed validation, dropping");
                    counter!("ws_schema_violations_total").increment(1);
                    InboundVerdict::Drop
                }
            }
        }
        WireMessage::CallError { .. } => InboundVerdict::Pass,
    }
}

/// Outbound stage dropping Calls whose request payload fails validation.
///
/// Appended after the built-in stages; a stopped Call's pending slot is
/// cleaned up by the send path.
pub struct OutboundSchemaValidation {
    validator: Arc<dyn SchemaValidator>,
    protocol: ProtocolVersion,
}

impl OutboundSchemaValidation {
    /// Create the stage for one connection's negotiated protocol.
    #[must_use]
    pub fn new(validator: Arc<dyn SchemaValidator>, protocol: ProtocolVersion) -> Self {
        Self { validator, protocol }
    }
}

#[async_trait]
impl Stage<Outbound> for OutboundSchemaValidation {
    async fn handle(&self, message: &Outbound) -> Result<Flow, EngineError> {
        let Outbound::Call(call) = message else {
            return Ok(Flow::Continue);
        };
        match self
            .validator
            .validate(&call.action, PayloadKind::Request, self.protocol, &call.payload)
        {
            Ok(()) => Ok(Flow::Continue),
            Err(reason) => {
                warn!(client = %call.recipient, action = %call.action, %reason,
                    "outbound call payload failed validation, dropping");
                counter!("ws_schema_violations_total").increment(1);
                Ok(Flow::Stop)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use ocppd_core::{MessageId, OutboundCall};

    /// Requires every validated payload to carry a `"v"` key.
    struct RequireV;

    impl SchemaValidator for RequireV {
        fn validate(
            &self,
            _action: &str,
            _kind: PayloadKind,
            _protocol: ProtocolVersion,
            payload: &Value,
        ) -> Result<(), String> {
            if payload.get("v").is_some() {
                Ok(())
            } else {
                Err("missing required property 'v'".into())
            }
        }
    }

    fn session() -> Session {
        Session::new(ClientId::from("CP001"), ProtocolVersion::Ocpp16)
    }

    fn call_frame(id: &str, payload: Value) -> WireMessage {
        WireMessage::Call {
            id: MessageId::from(id),
            action: "Heartbeat".into(),
            payload,
        }
    }

    #[test]
    fn conformant_call_passes() {
        let verdict = check_inbound(
            &RequireV,
            &session(),
            &ClientId::from("CP001"),
            &call_frame("1", json!({"v": 1})),
        );
        assert_matches!(verdict, InboundVerdict::Pass);
    }

    #[test]
    fn invalid_call_rejected_with_format_violation() {
        let verdict = check_inbound(
            &RequireV,
            &session(),
            &ClientId::from("CP001"),
            &call_frame("1", json!({})),
        );
        assert_matches!(verdict, InboundVerdict::Reject(error) => {
            assert_eq!(error.code, ErrorCode::FormatViolation);
            assert_eq!(error.id.as_str(), "1");
            assert!(error.description.contains("missing required property"));
        });
    }

    #[tokio::test]
    async fn invalid_response_dropped() {
        let store = Arc::new(ocppd_engine::SessionStore::new());
        store.add(Arc::new(session())).unwrap();
        let session = store.get(&ClientId::from("CP001")).unwrap();

        let (call, _future) = OutboundCall::new(
            ClientId::from("CP001"),
            MessageId::from("abc"),
            "GetConfiguration",
            json!({"v": 1}),
        );
        let _ = ocppd_engine::OutboundSynchronicity::new(store)
            .handle(&Outbound::Call(call))
            .await
            .unwrap();

        let frame = WireMessage::CallResult {
            id: MessageId::from("abc"),
            payload: json!({}),
        };
        let verdict = check_inbound(&RequireV, &session, &ClientId::from("CP001"), &frame);
        assert_matches!(verdict, InboundVerdict::Drop);
    }

    #[test]
    fn response_without_pending_call_passes_through() {
        // Synchronicity raises the protocol error; validation stays out
        // of the way.
        let frame = WireMessage::CallResult {
            id: MessageId::from("abc"),
            payload: json!({}),
        };
        let verdict = check_inbound(&RequireV, &session(), &ClientId::from("CP001"), &frame);
        assert_matches!(verdict, InboundVerdict::Pass);
    }

    #[test]
    fn call_errors_are_never_validated() {
        let frame = WireMessage::CallError {
            id: MessageId::from("abc"),
            code: ErrorCode::GenericError,
            description: "err".into(),
            details: json!({}),
        };
        let verdict = check_inbound(&RequireV, &session(), &ClientId::from("CP001"), &frame);
        assert_matches!(verdict, InboundVerdict::Pass);
    }

    #[tokio::test]
    async fn outbound_invalid_call_stopped() {
        let stage =
            OutboundSchemaValidation::new(Arc::new(RequireV), ProtocolVersion::Ocpp16);
        let (call, _future) = OutboundCall::new(
            ClientId::from("CP001"),
            MessageId::from("1"),
            "Reset",
            json!({}),
        );
        assert_eq!(
            stage.handle(&Outbound::Call(call)).await.unwrap(),
            Flow::Stop
        );

        let (ok_call, _future) = OutboundCall::new(
            ClientId::from("CP001"),
            MessageId::from("2"),
            "Reset",
            json!({"v": true}),
        );
        assert_eq!(
            stage.handle(&Outbound::Call(ok_call)).await.unwrap(),
            Flow::Continue
        );
    }
}
