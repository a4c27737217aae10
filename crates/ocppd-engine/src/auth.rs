//! Authentication pipeline: requests, decisions, and built-in stages.
//!
//! The handshake is accept-by-exception: a stage must explicitly accept,
//! and a request still undecided after the last stage is rejected.

use std::sync::Arc;

use async_trait::async_trait;
use ocppd_core::{ClientId, ProtocolVersion};
use parking_lot::Mutex;
use tracing::warn;

use crate::chain::{Flow, Stage};
use crate::errors::EngineError;
use crate::store::SessionStore;

/// The decision made for an authentication request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthDecision {
    /// Handshake accepted with the selected protocol version.
    Accepted(ProtocolVersion),
    /// Handshake rejected with a reason.
    Rejected(String),
}

/// A pending connection handshake.
///
/// Exactly one of [`accept`](Self::accept) / [`reject`](Self::reject) may
/// be called, exactly once; a second decision fails with
/// [`EngineError::AlreadyDecided`].
pub struct AuthRequest {
    client: ClientId,
    protocols: Vec<ProtocolVersion>,
    password: Option<String>,
    decision: Mutex<Option<AuthDecision>>,
}

impl AuthRequest {
    /// Create a request from transport-supplied handshake properties.
    #[must_use]
    pub fn new(
        client: ClientId,
        protocols: Vec<ProtocolVersion>,
        password: Option<String>,
    ) -> Self {
        Self {
            client,
            protocols,
            password,
            decision: Mutex::new(None),
        }
    }

    /// The candidate client identity.
    #[must_use]
    pub fn client(&self) -> &ClientId {
        &self.client
    }

    /// The protocol sub-versions the client offered.
    #[must_use]
    pub fn protocols(&self) -> &[ProtocolVersion] {
        &self.protocols
    }

    /// Credential material supplied with the handshake, if any.
    #[must_use]
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    fn decided_error(decision: &AuthDecision, client: &ClientId) -> EngineError {
        EngineError::AlreadyDecided {
            client: client.clone(),
            decision: match decision {
                AuthDecision::Accepted(_) => "accepted",
                AuthDecision::Rejected(_) => "rejected",
            },
        }
    }

    /// Accept the handshake, selecting one offered protocol.
    ///
    /// Defaults to the first offered version.
    pub fn accept(&self, protocol: Option<ProtocolVersion>) -> Result<ProtocolVersion, EngineError> {
        let mut decision = self.decision.lock();
        if let Some(existing) = decision.as_ref() {
            return Err(Self::decided_error(existing, &self.client));
        }
        let selected = match protocol {
            Some(protocol) => protocol,
            None => self
                .protocols
                .first()
                .copied()
                .ok_or_else(|| EngineError::NoProtocolOffered(self.client.clone()))?,
        };
        *decision = Some(AuthDecision::Accepted(selected));
        Ok(selected)
    }

    /// Reject the handshake.
    pub fn reject(&self, reason: impl Into<String>) -> Result<(), EngineError> {
        let mut decision = self.decision.lock();
        if let Some(existing) = decision.as_ref() {
            return Err(Self::decided_error(existing, &self.client));
        }
        *decision = Some(AuthDecision::Rejected(reason.into()));
        Ok(())
    }

    /// The decision, if one has been made.
    #[must_use]
    pub fn decision(&self) -> Option<AuthDecision> {
        self.decision.lock().clone()
    }

    /// Whether the request has been accepted.
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self.decision(), Some(AuthDecision::Accepted(_)))
    }

    /// Whether the request has been rejected.
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        matches!(self.decision(), Some(AuthDecision::Rejected(_)))
    }
}

impl std::fmt::Debug for AuthRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthRequest")
            .field("client", &self.client)
            .field("protocols", &self.protocols)
            .field("has_password", &self.password.is_some())
            .field("decision", &self.decision())
            .finish()
    }
}

/// Rejects a handshake when a session for the client identity already
/// exists.
pub struct SessionExists {
    store: Arc<SessionStore>,
}

impl SessionExists {
    /// Create the stage over the shared session store.
    #[must_use]
    pub fn new(store: Arc<SessionStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Stage<AuthRequest> for SessionExists {
    async fn handle(&self, request: &AuthRequest) -> Result<Flow, EngineError> {
        if self.store.has(request.client()) {
            warn!(client = %request.client(), "client is already connected");
            request.reject("already connected")?;
            return Ok(Flow::Stop);
        }
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use ocppd_core::ProtocolVersion;

    use crate::session::Session;

    fn request() -> AuthRequest {
        AuthRequest::new(
            ClientId::from("CP001"),
            vec![ProtocolVersion::Ocpp16, ProtocolVersion::Ocpp201],
            Some("secret".into()),
        )
    }

    #[test]
    fn accept_defaults_to_first_offered() {
        let request = request();
        let selected = request.accept(None).unwrap();
        assert_eq!(selected, ProtocolVersion::Ocpp16);
        assert!(request.is_accepted());
    }

    #[test]
    fn accept_with_explicit_protocol() {
        let request = request();
        let selected = request.accept(Some(ProtocolVersion::Ocpp201)).unwrap();
        assert_eq!(selected, ProtocolVersion::Ocpp201);
    }

    #[test]
    fn accept_twice_fails() {
        let request = request();
        let _ = request.accept(None).unwrap();
        let err = request.accept(None).unwrap_err();
        assert_matches!(err, EngineError::AlreadyDecided { decision: "accepted", .. });
    }

    #[test]
    fn reject_after_accept_fails() {
        let request = request();
        let _ = request.accept(None).unwrap();
        let err = request.reject("nope").unwrap_err();
        assert_matches!(err, EngineError::AlreadyDecided { decision: "accepted", .. });
    }

    #[test]
    fn accept_after_reject_fails() {
        let request = request();
        request.reject("bad credentials").unwrap();
        let err = request.accept(None).unwrap_err();
        assert_matches!(err, EngineError::AlreadyDecided { decision: "rejected", .. });
        assert_matches!(request.decision(), Some(AuthDecision::Rejected(reason)) => {
            assert_eq!(reason, "bad credentials");
        });
    }

    #[test]
    fn accept_with_no_offered_protocols_fails() {
        let request = AuthRequest::new(ClientId::from("CP001"), Vec::new(), None);
        let err = request.accept(None).unwrap_err();
        assert_matches!(err, EngineError::NoProtocolOffered(_));
        // A failed accept leaves the request undecided
        assert!(request.decision().is_none());
    }

    #[test]
    fn undecided_request_reports_neither() {
        let request = request();
        assert!(!request.is_accepted());
        assert!(!request.is_rejected());
        assert!(request.decision().is_none());
    }

    #[tokio::test]
    async fn session_exists_rejects_connected_client() {
        let store = Arc::new(SessionStore::new());
        store
            .add(Arc::new(Session::new(
                ClientId::from("CP001"),
                ProtocolVersion::Ocpp16,
            )))
            .unwrap();

        let stage = SessionExists::new(store);
        let request = request();
        let flow = stage.handle(&request).await.unwrap();
        assert_eq!(flow, Flow::Stop);
        assert!(request.is_rejected());
    }

    #[tokio::test]
    async fn session_exists_passes_new_client() {
        let stage = SessionExists::new(Arc::new(SessionStore::new()));
        let request = request();
        let flow = stage.handle(&request).await.unwrap();
        assert_eq!(flow, Flow::Continue);
        assert!(request.decision().is_none());
    }
}
