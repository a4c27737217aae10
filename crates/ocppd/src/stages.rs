//! Built-in demo stages for the server binary.

use std::sync::Arc;

use async_trait::async_trait;
use ocppd_core::{Inbound, Outbound, OutboundCallResult};
use ocppd_engine::{AuthRequest, EngineError, Flow, Stage};
use serde_json::json;
use tracing::{debug, info};

/// Answers `Heartbeat` calls with the server's current time.
pub struct Heartbeat;

#[async_trait]
impl Stage<Inbound> for Heartbeat {
    async fn handle(&self, message: &Inbound) -> Result<Flow, EngineError> {
        let Inbound::Call(call) = message else {
            return Ok(Flow::Continue);
        };
        if call.action != "Heartbeat" {
            return Ok(Flow::Continue);
        }

        debug!(client = %call.sender, id = %call.id, "answering heartbeat");
        let response = Outbound::CallResult(Arc::new(OutboundCallResult::new(
            call.sender.clone(),
            call.id.clone(),
            json!({ "currentTime": chrono::Utc::now().to_rfc3339() }),
        )));
        call.respond(response).await?;
        Ok(Flow::Stop)
    }
}

/// Accepts handshakes carrying the expected password.
///
/// With no expected password configured, every handshake that reaches
/// this stage is accepted.
pub struct PasswordAuth {
    expected: Option<String>,
}

impl PasswordAuth {
    /// Create the stage; `expected` of `None` accepts everyone.
    #[must_use]
    pub fn new(expected: Option<String>) -> Self {
        Self { expected }
    }
}

#[async_trait]
impl Stage<AuthRequest> for PasswordAuth {
    async fn handle(&self, request: &AuthRequest) -> Result<Flow, EngineError> {
        match (&self.expected, request.password()) {
            (Some(expected), Some(password)) if expected == password => {}
            (Some(_), _) => {
                info!(client = %request.client(), "password mismatch");
                request.reject("invalid credentials")?;
                return Ok(Flow::Stop);
            }
            (None, _) => {}
        }

        let protocol = request.accept(None)?;
        info!(client = %request.client(), %protocol, "client accepted");
        Ok(Flow::Stop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use ocppd_core::{ClientId, InboundCall, MessageId, ProtocolVersion, ResponseSink};
    use ocppd_engine::AuthDecision;
    use serde_json::Value;

    fn capture_sink() -> (ResponseSink, tokio::sync::mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let sink: ResponseSink = Arc::new(move |outbound| {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(outbound);
                Ok(())
            })
        });
        (sink, rx)
    }

    #[tokio::test]
    async fn heartbeat_answers_with_current_time() {
        let (sink, mut rx) = capture_sink();
        let call = Inbound::Call(InboundCall::new(
            ClientId::from("CP001"),
            MessageId::from("19223201"),
            "Heartbeat",
            json!({}),
            sink,
        ));

        let flow = Heartbeat.handle(&call).await.unwrap();
        assert_eq!(flow, Flow::Stop);

        let response = rx.recv().await.unwrap();
        assert_eq!(response.id().as_str(), "19223201");
        assert_matches!(response, Outbound::CallResult(result) => {
            let time: Value = result.payload["currentTime"].clone();
            assert!(time.as_str().is_some());
        });
    }

    #[tokio::test]
    async fn non_heartbeat_calls_pass_through() {
        let (sink, _rx) = capture_sink();
        let call = Inbound::Call(InboundCall::new(
            ClientId::from("CP001"),
            MessageId::from("1"),
            "BootNotification",
            json!({}),
            sink,
        ));
        assert_eq!(Heartbeat.handle(&call).await.unwrap(), Flow::Continue);
    }

    fn request(password: Option<&str>) -> AuthRequest {
        AuthRequest::new(
            ClientId::from("CP001"),
            vec![ProtocolVersion::Ocpp16],
            password.map(ToOwned::to_owned),
        )
    }

    #[tokio::test]
    async fn matching_password_accepted() {
        let stage = PasswordAuth::new(Some("s3cret".into()));
        let req = request(Some("s3cret"));
        assert_eq!(stage.handle(&req).await.unwrap(), Flow::Stop);
        assert_eq!(
            req.decision(),
            Some(AuthDecision::Accepted(ProtocolVersion::Ocpp16))
        );
    }

    #[tokio::test]
    async fn wrong_password_rejected() {
        let stage = PasswordAuth::new(Some("s3cret".into()));
        let req = request(Some("nope"));
        assert_eq!(stage.handle(&req).await.unwrap(), Flow::Stop);
        assert_matches!(req.decision(), Some(AuthDecision::Rejected(_)));
    }

    #[tokio::test]
    async fn missing_password_rejected_when_expected() {
        let stage = PasswordAuth::new(Some("s3cret".into()));
        let req = request(None);
        assert_eq!(stage.handle(&req).await.unwrap(), Flow::Stop);
        assert_matches!(req.decision(), Some(AuthDecision::Rejected(_)));
    }

    #[tokio::test]
    async fn no_expected_password_accepts_everyone() {
        let stage = PasswordAuth::new(None);
        let req = request(None);
        assert_eq!(stage.handle(&req).await.unwrap(), Flow::Stop);
        assert_matches!(req.decision(), Some(AuthDecision::Accepted(_)));
    }
}
