//! The WebSocket transport: axum server, upgrade handling, socket tasks.

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock, Weak};

use async_trait::async_trait;
use axum::Router;
use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::header::{AUTHORIZATION, SEC_WEBSOCKET_PROTOCOL};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use metrics::counter;
use ocppd_core::{ClientId, ProtocolVersion};
use ocppd_engine::{AuthDecision, AuthRequest, Endpoint, EngineError, Transport};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::WsConfig;
use crate::connection::{Connection, Frame, process_text_frame};
use crate::heartbeat::{HeartbeatResult, run_heartbeat};
use crate::schema::SchemaValidator;
use crate::upgrade::parse_upgrade;

struct Running {
    cancel: CancellationToken,
    addr: SocketAddr,
}

/// WebSocket transport for an [`Endpoint`].
///
/// Created before the endpoint (the endpoint owns the transport), then
/// bound to it with [`bind_endpoint`](Self::bind_endpoint) before
/// `listen()` is called.
pub struct WsTransport {
    config: WsConfig,
    validator: Option<Arc<dyn SchemaValidator>>,
    connections: DashMap<ClientId, Arc<Connection>>,
    endpoint: OnceLock<Weak<Endpoint>>,
    running: Mutex<Option<Running>>,
    // Handle to the Arc this transport lives in, for the axum state
    self_ref: Weak<WsTransport>,
}

impl WsTransport {
    /// Create a transport from its configuration.
    #[must_use]
    pub fn new(config: WsConfig) -> Arc<Self> {
        Self::with_validator_opt(config, None)
    }

    /// Create a transport that validates payloads against schemas.
    #[must_use]
    pub fn with_validator(config: WsConfig, validator: Arc<dyn SchemaValidator>) -> Arc<Self> {
        Self::with_validator_opt(config, Some(validator))
    }

    fn with_validator_opt(
        config: WsConfig,
        validator: Option<Arc<dyn SchemaValidator>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            config,
            validator,
            connections: DashMap::new(),
            endpoint: OnceLock::new(),
            running: Mutex::new(None),
            self_ref: self_ref.clone(),
        })
    }

    /// Attach the endpoint this transport feeds. Must be called exactly
    /// once, before `listen()`.
    pub fn bind_endpoint(&self, endpoint: &Arc<Endpoint>) {
        let _ = self.endpoint.set(Arc::downgrade(endpoint));
    }

    fn endpoint(&self) -> Result<Arc<Endpoint>, EngineError> {
        self.endpoint
            .get()
            .and_then(Weak::upgrade)
            .ok_or_else(|| EngineError::Transport("transport is not bound to an endpoint".into()))
    }

    /// The bound socket address while listening (useful with port 0).
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().as_ref().map(|running| running.addr)
    }

    /// Number of open connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    fn router(&self) -> Result<Router, EngineError> {
        let endpoint = self.endpoint()?;
        let Some(transport) = self.self_ref.upgrade() else {
            return Err(EngineError::Transport("transport handle is gone".into()));
        };
        Ok(Router::new()
            .route(
                &format!("/{}/{{client_id}}", self.config.route),
                any(ws_handler),
            )
            .with_state(TransportState(endpoint, transport)))
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn listen(&self) -> Result<(), EngineError> {
        let _ = self.endpoint()?;
        if self.running.lock().is_some() {
            return Err(EngineError::AlreadyListening);
        }

        let listener = TcpListener::bind(self.config.bind_addr())
            .await
            .map_err(|err| EngineError::Transport(format!("bind failed: {err}")))?;
        let addr = listener
            .local_addr()
            .map_err(|err| EngineError::Transport(format!("local_addr failed: {err}")))?;

        let router = self.router()?;

        let cancel = CancellationToken::new();
        let shutdown = cancel.clone();
        let _serve = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await;
            if let Err(err) = result {
                warn!(%err, "websocket server exited with error");
            }
        });

        info!(%addr, route = %self.config.route, "websocket transport listening");
        *self.running.lock() = Some(Running { cancel, addr });
        Ok(())
    }

    async fn stop(&self) -> Result<(), EngineError> {
        let Some(running) = self.running.lock().take() else {
            return Err(EngineError::NotListening);
        };
        running.cancel.cancel();

        for entry in self.connections.iter() {
            entry.value().cancel().cancel();
        }
        self.connections.clear();
        info!("websocket transport stopped");
        Ok(())
    }

    async fn send_text(&self, recipient: &ClientId, frame: String) -> Result<(), EngineError> {
        let Some(connection) = self
            .connections
            .get(recipient)
            .map(|entry| entry.value().clone())
        else {
            return Err(EngineError::NotConnected(recipient.clone()));
        };

        if !connection.send(Frame::Text(frame)) {
            return Err(EngineError::Transport(format!(
                "write channel for {recipient} is unavailable"
            )));
        }
        counter!("ws_messages_sent_total").increment(1);
        Ok(())
    }
}

#[derive(Clone)]
struct TransportState(Arc<Endpoint>, Arc<WsTransport>);

async fn ws_handler(
    State(state): State<TransportState>,
    Path(client_id): Path<String>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let TransportState(endpoint, transport) = state;

    let header_str = |name| headers.get(name).and_then(|value| value.to_str().ok());
    let path = format!("/{}/{}", transport.config.route, client_id);
    let handshake = match parse_upgrade(
        &path,
        header_str(SEC_WEBSOCKET_PROTOCOL),
        header_str(AUTHORIZATION),
        &transport.config.route,
        &transport.config.protocols,
        transport.config.require_basic_auth,
    ) {
        Ok(handshake) => handshake,
        Err(err) => {
            debug!(%client_id, %err, "upgrade refused");
            return (err.status(), err.to_string()).into_response();
        }
    };

    let request = AuthRequest::new(
        handshake.client.clone(),
        handshake.protocols,
        handshake.password,
    );
    let decision = match endpoint.connection_attempt(&request).await {
        Ok(decision) => decision,
        Err(err) => {
            warn!(client = %handshake.client, %err, "connection attempt failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match decision {
        AuthDecision::Rejected(reason) => {
            debug!(client = %handshake.client, %reason, "connection rejected");
            (StatusCode::UNAUTHORIZED, reason).into_response()
        }
        AuthDecision::Accepted(protocol) => {
            let client = handshake.client;
            ws.protocols([protocol.as_str()])
                .max_message_size(transport.config.max_message_size)
                .on_upgrade(move |socket| {
                    handle_socket(endpoint, transport, client, protocol, socket)
                })
        }
    }
}

async fn handle_socket(
    endpoint: Arc<Endpoint>,
    transport: Arc<WsTransport>,
    client: ClientId,
    protocol: ProtocolVersion,
    socket: WebSocket,
) {
    if let Err(err) = endpoint.client_connected(client.clone(), protocol) {
        // Lost the race against another upgrade for the same identity
        warn!(client = %client, %err, "session creation failed, closing socket");
        return;
    }
    counter!("ws_connections_total").increment(1);

    let (tx, mut rx) = mpsc::channel::<Frame>(64);
    let connection = Arc::new(Connection::new(client.clone(), tx));
    let _ = transport
        .connections
        .insert(client.clone(), connection.clone());

    let (mut sink, mut stream) = socket.split();
    let cancel = connection.cancel().clone();

    let write_cancel = cancel.clone();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                frame = rx.recv() => {
                    let Some(frame) = frame else { break };
                    let message = match frame {
                        Frame::Text(text) => Message::Text(text.into()),
                        Frame::Ping => Message::Ping(Bytes::new()),
                        Frame::Pong(data) => Message::Pong(Bytes::from(data)),
                    };
                    if sink.send(message).await.is_err() {
                        break;
                    }
                }
                () = write_cancel.cancelled() => break,
            }
        }
    });

    let heartbeat_connection = connection.clone();
    let heartbeat_cancel = cancel.clone();
    let interval = transport.config.heartbeat_interval();
    let timeout = transport.config.heartbeat_timeout();
    let heartbeat = tokio::spawn(async move {
        let result = run_heartbeat(
            heartbeat_connection.clone(),
            interval,
            timeout,
            heartbeat_cancel.clone(),
        )
        .await;
        if result == HeartbeatResult::TimedOut {
            warn!(client = %heartbeat_connection.client, "heartbeat timed out");
            heartbeat_cancel.cancel();
        }
    });

    // Frames are processed strictly one at a time: a message's chain run
    // completes before the next frame is read.
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            next = stream.next() => match next {
                Some(Ok(Message::Text(text))) => {
                    connection.mark_alive();
                    process_text_frame(
                        &endpoint,
                        &client,
                        text.as_str(),
                        transport.validator.as_deref(),
                    )
                    .await;
                }
                Some(Ok(Message::Binary(_))) => {
                    warn!(client = %client, "binary frame received, dropping connection");
                    break;
                }
                Some(Ok(Message::Ping(data))) => {
                    connection.mark_alive();
                    let _ = connection.send(Frame::Pong(data.to_vec()));
                }
                Some(Ok(Message::Pong(_))) => connection.mark_alive(),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(err)) => {
                    debug!(client = %client, %err, "socket read failed");
                    break;
                }
            }
        }
    }

    cancel.cancel();
    let _ = transport.connections.remove(&client);
    if let Err(err) = endpoint.client_disconnected(&client) {
        // stop() may have drained the session first
        debug!(client = %client, %err, "disconnect cleanup");
    }
    heartbeat.abort();
    writer.abort();
}
