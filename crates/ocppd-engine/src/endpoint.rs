//! The server endpoint: lifecycle, chain assembly, and transport glue.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use ocppd_core::{ClientId, CoreError, Inbound, Outbound, ProtocolVersion, ResponseSink, codec};
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::actions::{InboundActionsAllowed, OutboundActionsAllowed};
use crate::auth::{AuthDecision, AuthRequest, SessionExists};
use crate::chain::{Chain, ChainOutcome, Flow, Stage};
use crate::config::EndpointConfig;
use crate::errors::EngineError;
use crate::events::{EndpointEvent, Events};
use crate::session::Session;
use crate::store::SessionStore;
use crate::sync::{InboundSynchronicity, OutboundSynchronicity};

/// Wire transport consumed by the endpoint.
///
/// Implemented by `ocppd-ws` for WebSocket, and by mocks in tests. The
/// transport owns connection acceptance and framing; the endpoint owns
/// everything above the frame level.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Bind and start accepting connections.
    async fn listen(&self) -> Result<(), EngineError>;

    /// Stop accepting and tear down existing connections.
    async fn stop(&self) -> Result<(), EngineError>;

    /// Write one text frame to a connected client.
    async fn send_text(&self, recipient: &ClientId, frame: String) -> Result<(), EngineError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Created,
    Listening,
    Stopped,
}

/// Assembles an [`Endpoint`] with caller-supplied stages appended to the
/// built-in ones.
pub struct EndpointBuilder {
    config: EndpointConfig,
    transport: Arc<dyn Transport>,
    auth_stages: Vec<Arc<dyn Stage<AuthRequest>>>,
    inbound_stages: Vec<Arc<dyn Stage<Inbound>>>,
    outbound_stages: Vec<Arc<dyn Stage<Outbound>>>,
}

impl EndpointBuilder {
    /// Append a stage to the authentication chain (runs after the
    /// built-in duplicate-identity check).
    #[must_use]
    pub fn auth_stage(mut self, stage: Arc<dyn Stage<AuthRequest>>) -> Self {
        self.auth_stages.push(stage);
        self
    }

    /// Append a business stage to the inbound chain (runs after
    /// synchronicity and action checks).
    #[must_use]
    pub fn inbound_stage(mut self, stage: Arc<dyn Stage<Inbound>>) -> Self {
        self.inbound_stages.push(stage);
        self
    }

    /// Append a stage to the outbound chain (runs after the built-in
    /// checks, before the transport write).
    #[must_use]
    pub fn outbound_stage(mut self, stage: Arc<dyn Stage<Outbound>>) -> Self {
        self.outbound_stages.push(stage);
        self
    }

    /// Assemble the endpoint.
    #[must_use]
    pub fn build(self) -> Arc<Endpoint> {
        let store = Arc::new(SessionStore::new());
        let events = Arc::new(Events::new());
        let allowed: Arc<HashSet<String>> =
            Arc::new(self.config.allowed_actions.iter().cloned().collect());

        let mut auth: Vec<Arc<dyn Stage<AuthRequest>>> =
            vec![Arc::new(SessionExists::new(store.clone()))];
        auth.extend(self.auth_stages);

        let mut inbound: Vec<Arc<dyn Stage<Inbound>>> = vec![
            Arc::new(InboundSynchronicity::new(store.clone())),
            Arc::new(InboundActionsAllowed::new(allowed.clone())),
        ];
        inbound.extend(self.inbound_stages);

        let mut outbound: Vec<Arc<dyn Stage<Outbound>>> = vec![
            Arc::new(OutboundActionsAllowed::new(allowed)),
            Arc::new(OutboundSynchronicity::new(store.clone())),
        ];
        outbound.extend(self.outbound_stages);
        outbound.push(Arc::new(SendStage {
            transport: self.transport.clone(),
            events: events.clone(),
        }));

        Arc::new(Endpoint {
            config: self.config,
            transport: self.transport,
            store,
            events,
            state: Mutex::new(State::Created),
            auth_chain: Chain::new(auth),
            inbound_chain: Chain::new(inbound),
            outbound_chain: Chain::new(outbound),
        })
    }
}

/// A server endpoint over one transport.
///
/// Lifecycle is `Created -> Listening -> Stopped`, with re-listen
/// permitted after a stop. The transport invokes the `connection_attempt`,
/// `client_connected`, `client_disconnected` and `inbound_message`
/// callbacks; callers use `listen`, `stop` and `send_message`.
pub struct Endpoint {
    config: EndpointConfig,
    transport: Arc<dyn Transport>,
    store: Arc<SessionStore>,
    events: Arc<Events>,
    state: Mutex<State>,
    auth_chain: Chain<AuthRequest>,
    inbound_chain: Chain<Inbound>,
    outbound_chain: Chain<Outbound>,
}

impl Endpoint {
    /// Start building an endpoint over the given transport.
    #[must_use]
    pub fn builder(config: EndpointConfig, transport: Arc<dyn Transport>) -> EndpointBuilder {
        EndpointBuilder {
            config,
            transport,
            auth_stages: Vec::new(),
            inbound_stages: Vec::new(),
            outbound_stages: Vec::new(),
        }
    }

    /// The endpoint configuration.
    #[must_use]
    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    /// The shared session store.
    #[must_use]
    pub fn sessions(&self) -> &SessionStore {
        &self.store
    }

    /// The event fan-out; subscribe before `listen()` to observe startup.
    #[must_use]
    pub fn events(&self) -> &Events {
        &self.events
    }

    /// Whether the endpoint is accepting connections.
    #[must_use]
    pub fn is_listening(&self) -> bool {
        *self.state.lock() == State::Listening
    }

    /// Bind the transport and start accepting connections.
    pub async fn listen(&self) -> Result<(), EngineError> {
        {
            let mut state = self.state.lock();
            if *state == State::Listening {
                return Err(EngineError::AlreadyListening);
            }
            *state = State::Listening;
        }
        self.events.emit(EndpointEvent::ServerStarting);

        if let Err(err) = self.transport.listen().await {
            *self.state.lock() = State::Stopped;
            return Err(err);
        }
        self.events.emit(EndpointEvent::ServerListening);
        Ok(())
    }

    /// Stop accepting connections and tear down every session.
    pub async fn stop(&self) -> Result<(), EngineError> {
        {
            let mut state = self.state.lock();
            if *state != State::Listening {
                return Err(EngineError::NotListening);
            }
            *state = State::Stopped;
        }
        self.events.emit(EndpointEvent::ServerStopping);

        let stopped = self.transport.stop().await;

        // The endpoint is Stopped even when the transport errored, so the
        // store is drained either way; a later listen() must start clean.
        // Sessions whose disconnect callback never fired (the transport
        // stopped wholesale) still need their pending calls abandoned.
        for session in self.store.drain() {
            if let Some(call) = session.take_pending_outbound() {
                warn!(client = %session.client(), id = %call.id,
                    "abandoning pending call at shutdown");
                let _ = call.abandon();
            }
            self.events
                .emit(EndpointEvent::ClientDisconnected(session.client().clone()));
        }
        self.events.emit(EndpointEvent::ServerStopped);
        stopped
    }

    /// Send a message through the outbound chain.
    ///
    /// A Call that reaches the wire schedules a timeout: if no response
    /// arrives within `message_timeout`, the pending slot is cleared and
    /// the call's response future resolves to `Abandoned`.
    pub async fn send_message(&self, message: Outbound) -> Result<ChainOutcome, EngineError> {
        if !self.is_listening() {
            return Err(EngineError::NotListening);
        }

        let result = self.outbound_chain.run(&message).await;
        if let (Outbound::Call(call), outcome) = (&message, &result) {
            match outcome {
                Ok(ChainOutcome::Completed) => {
                    self.schedule_timeout(call.recipient.clone(), call.id.clone());
                }
                // A stage after synchronicity stopped or failed the send:
                // the recorded pending slot must not outlive the attempt.
                Ok(ChainOutcome::Stopped) | Err(_) => {
                    if let Ok(session) = self.store.get(&call.recipient) {
                        if let Some(recorded) = session.abandon_outbound(&call.id) {
                            let _ = recorded.abandon();
                        }
                    }
                }
            }
        }
        result
    }

    fn schedule_timeout(&self, client: ClientId, id: ocppd_core::MessageId) {
        let store = self.store.clone();
        let timeout = self.config.message_timeout();
        let _handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let Ok(session) = store.get(&client) else {
                return;
            };
            if let Some(call) = session.abandon_outbound(&id) {
                warn!(client = %client, id = %id, "call timed out waiting for response");
                counter!("endpoint_call_timeouts_total").increment(1);
                let _ = call.abandon();
            }
        });
    }

    /// Decide a connection handshake through the authentication chain.
    ///
    /// A request still undecided after the last stage is rejected
    /// (accept-by-exception).
    pub async fn connection_attempt(
        &self,
        request: &AuthRequest,
    ) -> Result<AuthDecision, EngineError> {
        if !self.is_listening() {
            return Err(EngineError::NotListening);
        }

        if let Err(err) = self.auth_chain.run(request).await {
            warn!(client = %request.client(), %err, "authentication chain failed");
            if request.decision().is_none() {
                request.reject("authentication failed")?;
            }
        }
        if request.decision().is_none() {
            debug!(client = %request.client(), "no stage accepted the connection");
            request.reject("rejected by default")?;
        }

        // reject() above guarantees a decision exists at this point
        request
            .decision()
            .ok_or_else(|| EngineError::Transport("authentication yielded no decision".into()))
    }

    /// Create the session for an accepted client. Invoked by the
    /// transport once the handshake upgrade completes.
    pub fn client_connected(
        &self,
        client: ClientId,
        protocol: ProtocolVersion,
    ) -> Result<Arc<Session>, EngineError> {
        let session = Arc::new(Session::new(client, protocol));
        self.store.add(session.clone())?;
        counter!("endpoint_sessions_opened_total").increment(1);
        self.events
            .emit(EndpointEvent::ClientConnected(session.client().clone()));
        Ok(session)
    }

    /// Tear down the session for a closed connection. Any pending
    /// outbound call is abandoned so its caller stops waiting.
    pub fn client_disconnected(&self, client: &ClientId) -> Result<(), EngineError> {
        let session = self.store.remove(client)?;
        if let Some(call) = session.take_pending_outbound() {
            warn!(client = %client, id = %call.id,
                "client disconnected with a call pending");
            let _ = call.abandon();
        }
        counter!("endpoint_sessions_closed_total").increment(1);
        self.events
            .emit(EndpointEvent::ClientDisconnected(client.clone()));
        Ok(())
    }

    /// Process one decoded inbound message through the inbound chain.
    ///
    /// A stage failure carrying a wire error is answered with that
    /// CallError through the normal outbound path; it never crashes the
    /// connection.
    pub async fn inbound_message(&self, message: Inbound) -> Result<ChainOutcome, EngineError> {
        if !self.is_listening() {
            return Err(EngineError::NotListening);
        }

        counter!("endpoint_messages_received_total").increment(1);
        self.events
            .emit(EndpointEvent::MessageReceived(Arc::new(message.clone())));

        match self.inbound_chain.run(&message).await {
            Ok(outcome) => Ok(outcome),
            Err(EngineError::CallError(wire_error)) => {
                if let Err(err) = self.send_message(Outbound::CallError(wire_error)).await {
                    error!(client = %message.sender(), %err,
                        "failed to send protocol error response");
                }
                Ok(ChainOutcome::Stopped)
            }
            Err(err) => Err(err),
        }
    }

    /// Response sink for inbound calls: routes responses back through the
    /// outbound chain of this endpoint.
    #[must_use]
    pub fn response_sink(self: &Arc<Self>) -> ResponseSink {
        let endpoint = Arc::downgrade(self);
        Arc::new(move |response: Outbound| {
            let endpoint = endpoint.clone();
            Box::pin(async move {
                let Some(endpoint) = endpoint.upgrade() else {
                    return Err(CoreError::Send {
                        id: response.id().clone(),
                        reason: "endpoint is gone".into(),
                    });
                };
                let id = response.id().clone();
                let _ = endpoint
                    .send_message(response)
                    .await
                    .map_err(|err| CoreError::Send {
                        id,
                        reason: err.to_string(),
                    })?;
                Ok(())
            })
        })
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("state", &*self.state.lock())
            .field("sessions", &self.store.len())
            .finish_non_exhaustive()
    }
}

/// Terminal outbound stage: encode, write, mark sent.
struct SendStage {
    transport: Arc<dyn Transport>,
    events: Arc<Events>,
}

#[async_trait]
impl Stage<Outbound> for SendStage {
    async fn handle(&self, message: &Outbound) -> Result<Flow, EngineError> {
        let frame = codec::encode(&codec::WireMessage::from(message));
        self.transport
            .send_text(message.recipient(), frame)
            .await?;
        let _ = message.mark_sent();
        counter!("endpoint_messages_sent_total").increment(1);
        self.events
            .emit(EndpointEvent::MessageSent(Arc::new(message.clone())));
        Ok(Flow::Continue)
    }
}
