//! Per-connection state and the inbound frame path.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use metrics::counter;
use ocppd_core::{
    ClientId, ErrorCode, Inbound, InboundCall, InboundCallError, InboundCallResult, MessageId,
    Outbound, OutboundCallError, WireMessage, codec,
};
use ocppd_engine::Endpoint;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::schema::{InboundVerdict, SchemaValidator, check_inbound};

/// A frame queued for the connection's write task.
#[derive(Debug)]
pub(crate) enum Frame {
    /// A text frame carrying one OCPP-J array.
    Text(String),
    /// A liveness ping.
    Ping,
    /// A pong answering a client ping.
    Pong(Vec<u8>),
}

/// One connected client, shared between the read loop, the write task,
/// the heartbeat, and the transport registry.
pub struct Connection {
    /// The authenticated client identity.
    pub client: ClientId,
    tx: mpsc::Sender<Frame>,
    /// When the connection was established.
    pub connected_at: Instant,
    is_alive: AtomicBool,
    dropped_frames: AtomicU64,
    cancel: CancellationToken,
}

impl Connection {
    /// Create a connection around its write channel.
    pub(crate) fn new(client: ClientId, tx: mpsc::Sender<Frame>) -> Self {
        Self {
            client,
            tx,
            connected_at: Instant::now(),
            is_alive: AtomicBool::new(true),
            dropped_frames: AtomicU64::new(0),
            cancel: CancellationToken::new(),
        }
    }

    /// Queue a frame for the write task.
    ///
    /// Returns `false` when the channel is full or closed; the frame is
    /// counted as dropped.
    pub(crate) fn send(&self, frame: Frame) -> bool {
        if self.tx.try_send(frame).is_ok() {
            true
        } else {
            let _ = self.dropped_frames.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Frames dropped because the write channel was unavailable.
    pub fn drop_count(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Mark the connection alive (pong or any inbound activity).
    pub(crate) fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
    }

    /// Check and reset the alive flag; `true` if the client responded
    /// since the previous check.
    pub(crate) fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Token cancelling this connection's tasks.
    pub(crate) fn cancel(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Connection age.
    pub fn age(&self) -> std::time::Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("client", &self.client)
            .field("age", &self.age())
            .field("dropped_frames", &self.drop_count())
            .finish_non_exhaustive()
    }
}

/// Decode and process one inbound text frame.
///
/// Frames are handled strictly sequentially by the read loop: this
/// function completes before the next frame is read, so a connection's
/// messages enter the chain in arrival order. A frame that fails to
/// decode is answered with an uncorrelated `ProtocolError` CallError
/// under a fresh id; the connection survives.
pub async fn process_text_frame(
    endpoint: &Arc<Endpoint>,
    client: &ClientId,
    text: &str,
    validator: Option<&dyn SchemaValidator>,
) {
    counter!("ws_messages_received_total").increment(1);

    let frame = match codec::decode(text) {
        Ok(frame) => frame,
        Err(err) => {
            warn!(client = %client, %err, "received unparsable frame");
            counter!("ws_parse_errors_total").increment(1);
            let response = Outbound::CallError(Arc::new(OutboundCallError::new(
                client.clone(),
                MessageId::new(),
                ErrorCode::ProtocolError,
                format!("Failed to parse message: {err}"),
                Value::Null,
            )));
            if let Err(err) = endpoint.send_message(response).await {
                error!(client = %client, %err, "failed to send parse error response");
            }
            return;
        }
    };

    if let Some(validator) = validator {
        if let Ok(session) = endpoint.sessions().get(client) {
            match check_inbound(validator, &session, client, &frame) {
                InboundVerdict::Pass => {}
                InboundVerdict::Reject(wire_error) => {
                    if let Err(err) = endpoint.send_message(Outbound::CallError(wire_error)).await
                    {
                        error!(client = %client, %err, "failed to send validation error");
                    }
                    return;
                }
                InboundVerdict::Drop => return,
            }
        }
    }

    let inbound = match frame {
        WireMessage::Call { id, action, payload } => {
            debug!(client = %client, id = %id, %action, "received call");
            Inbound::Call(InboundCall::new(
                client.clone(),
                id,
                action,
                payload,
                endpoint.response_sink(),
            ))
        }
        WireMessage::CallResult { id, payload } => Inbound::CallResult(Arc::new(
            InboundCallResult::new(client.clone(), id, payload),
        )),
        WireMessage::CallError {
            id,
            code,
            description,
            details,
        } => Inbound::CallError(Arc::new(InboundCallError::new(
            client.clone(),
            id,
            code,
            description,
            details,
        ))),
    };

    if let Err(err) = endpoint.inbound_message(inbound).await {
        warn!(client = %client, %err, "inbound message processing failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use ocppd_core::ProtocolVersion;
    use ocppd_engine::{EndpointConfig, EngineError, Transport};
    use parking_lot::Mutex;
    use serde_json::json;

    struct RecordingTransport {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn listen(&self) -> Result<(), EngineError> {
            Ok(())
        }

        async fn stop(&self) -> Result<(), EngineError> {
            Ok(())
        }

        async fn send_text(&self, _recipient: &ClientId, frame: String) -> Result<(), EngineError> {
            self.sent.lock().push(frame);
            Ok(())
        }
    }

    async fn endpoint_with(
        actions: &[&str],
    ) -> (Arc<Endpoint>, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport {
            sent: Mutex::new(Vec::new()),
        });
        let config = EndpointConfig {
            allowed_actions: actions.iter().map(|a| (*a).to_owned()).collect(),
            ..EndpointConfig::default()
        };
        let endpoint = Endpoint::builder(config, transport.clone()).build();
        endpoint.listen().await.unwrap();
        let _ = endpoint
            .client_connected(ClientId::from("CP001"), ProtocolVersion::Ocpp16)
            .unwrap();
        (endpoint, transport)
    }

    fn sent_json(transport: &RecordingTransport) -> Vec<Value> {
        transport
            .sent
            .lock()
            .iter()
            .map(|frame| serde_json::from_str(frame).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn unparsable_frame_answered_with_uncorrelated_error() {
        let (endpoint, transport) = endpoint_with(&[]).await;
        let client = ClientId::from("CP001");

        process_text_frame(&endpoint, &client, "this is not json", None).await;

        let frames = sent_json(&transport);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0][0], json!(4));
        assert_eq!(frames[0][2], json!("ProtocolError"));
        let description = frames[0][3].as_str().unwrap();
        assert!(
            description.starts_with("Failed to parse message: "),
            "unexpected description: {description}"
        );
        assert_eq!(frames[0][4], Value::Null);
        // Fresh id, not anything taken from the bad frame
        assert!(frames[0][1].as_str().is_some_and(|id| !id.is_empty()));
    }

    #[tokio::test]
    async fn truncated_array_answered_with_uncorrelated_error() {
        let (endpoint, transport) = endpoint_with(&[]).await;
        let client = ClientId::from("CP001");

        process_text_frame(&endpoint, &client, r#"[2,"19223201"]"#, None).await;

        let frames = sent_json(&transport);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0][0], json!(4));
        assert_ne!(frames[0][1], json!("19223201"));
    }

    #[tokio::test]
    async fn decoded_call_reaches_chain() {
        let (endpoint, transport) = endpoint_with(&["Heartbeat"]).await;
        let client = ClientId::from("CP001");

        // No business stage: the call occupies the inbound pending slot
        process_text_frame(&endpoint, &client, r#"[2,"7","Heartbeat",{}]"#, None).await;

        assert!(transport.sent.lock().is_empty());
        let session = endpoint.sessions().get(&client).unwrap();
        assert_eq!(session.pending_inbound().unwrap().id.as_str(), "7");
    }

    #[tokio::test]
    async fn invalid_call_payload_rejected_by_validator() {
        struct RejectAll;

        impl SchemaValidator for RejectAll {
            fn validate(
                &self,
                _action: &str,
                _kind: crate::schema::PayloadKind,
                _protocol: ProtocolVersion,
                _payload: &Value,
            ) -> Result<(), String> {
                Err("no good".into())
            }
        }

        let (endpoint, transport) = endpoint_with(&["Heartbeat"]).await;
        let client = ClientId::from("CP001");

        process_text_frame(
            &endpoint,
            &client,
            r#"[2,"7","Heartbeat",{}]"#,
            Some(&RejectAll),
        )
        .await;

        let frames = sent_json(&transport);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0][0], json!(4));
        assert_eq!(frames[0][1], json!("7"));
        assert_eq!(frames[0][2], json!("FormatViolation"));
        // The rejected call never occupied the pending slot
        let session = endpoint.sessions().get(&client).unwrap();
        assert!(session.pending_inbound().is_none());
    }

    #[tokio::test]
    async fn connection_send_counts_drops() {
        let (tx, rx) = mpsc::channel(1);
        let connection = Connection::new(ClientId::from("CP001"), tx);

        assert!(connection.send(Frame::Ping));
        // Channel full
        assert!(!connection.send(Frame::Ping));
        assert_eq!(connection.drop_count(), 1);

        drop(rx);
        assert!(!connection.send(Frame::Ping));
        assert_eq!(connection.drop_count(), 2);
    }

    #[tokio::test]
    async fn alive_flag_check_and_reset() {
        let (tx, _rx) = mpsc::channel(1);
        let connection = Connection::new(ClientId::from("CP001"), tx);

        assert!(connection.check_alive());
        assert!(!connection.check_alive());
        connection.mark_alive();
        assert!(connection.check_alive());
    }

    #[tokio::test]
    async fn wrong_message_type_tag_rejected() {
        let (endpoint, transport) = endpoint_with(&[]).await;
        let client = ClientId::from("CP001");

        process_text_frame(&endpoint, &client, r#"[5,"1",{}]"#, None).await;

        let frames = sent_json(&transport);
        assert_eq!(frames.len(), 1);
        assert_matches!(frames[0][2].as_str(), Some("ProtocolError"));
    }
}
