//! Call messages: inbound (respondable) and outbound (resulting).

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::errors::CoreError;
use crate::ids::{ClientId, MessageId};
use crate::message::{Inbound, Outbound, SendState};

/// Delivery callback for responses to an inbound call.
///
/// Supplied by the transport adapter at construction time; an inbound call
/// without a sink cannot exist, so `respond()` never silently does nothing.
pub type ResponseSink =
    Arc<dyn Fn(Outbound) -> BoxFuture<'static, Result<(), CoreError>> + Send + Sync>;

/// An inbound request awaiting this endpoint's response.
///
/// `respond()` delivers a CallResult or CallError through the sink and is
/// irreversible: a second call fails with [`CoreError::AlreadyResponded`].
pub struct InboundCall {
    /// The client that sent the call.
    pub sender: ClientId,
    /// Correlation id.
    pub id: MessageId,
    /// Name of the remote procedure.
    pub action: String,
    /// Structured payload.
    pub payload: Value,
    /// When the call was received.
    pub received_at: DateTime<Utc>,
    sink: ResponseSink,
    responding: AtomicBool,
    response: Mutex<Option<Outbound>>,
}

impl InboundCall {
    /// Create an inbound call with its response sink.
    pub fn new(
        sender: ClientId,
        id: MessageId,
        action: impl Into<String>,
        payload: Value,
        sink: ResponseSink,
    ) -> Arc<Self> {
        Arc::new(Self {
            sender,
            id,
            action: action.into(),
            payload,
            received_at: Utc::now(),
            sink,
            responding: AtomicBool::new(false),
            response: Mutex::new(None),
        })
    }

    /// Respond to this call with a CallResult or CallError.
    ///
    /// Fails if the message is an outbound Call, or if a response has
    /// already been produced.
    pub async fn respond(&self, response: Outbound) -> Result<(), CoreError> {
        if response.is_call() {
            return Err(CoreError::NotAResponse(response.id().clone()));
        }
        if self.responding.swap(true, Ordering::SeqCst) {
            return Err(CoreError::AlreadyResponded(self.id.clone()));
        }

        (self.sink)(response.clone()).await?;
        *self.response.lock() = Some(response);
        Ok(())
    }

    /// Whether a response has been recorded.
    pub fn is_responded(&self) -> bool {
        self.response.lock().is_some()
    }

    /// The recorded response, if any.
    pub fn response(&self) -> Option<Outbound> {
        self.response.lock().clone()
    }
}

impl fmt::Debug for InboundCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundCall")
            .field("sender", &self.sender)
            .field("id", &self.id)
            .field("action", &self.action)
            .field("responded", &self.is_responded())
            .finish_non_exhaustive()
    }
}

/// An outbound request awaiting the client's response.
///
/// Construction yields the call together with a [`ResponseFuture`] that
/// resolves when the correlated inbound response arrives, or fails with
/// [`CoreError::Abandoned`] when the pending call is abandoned (timeout).
pub struct OutboundCall {
    /// The client this call is addressed to.
    pub recipient: ClientId,
    /// Correlation id.
    pub id: MessageId,
    /// Name of the remote procedure.
    pub action: String,
    /// Structured payload.
    pub payload: Value,
    /// Sent flag and send timestamp.
    pub send_state: SendState,
    responder: Mutex<Option<oneshot::Sender<Inbound>>>,
    delivered: AtomicBool,
}

impl OutboundCall {
    /// Create an outbound call and the future for its response.
    pub fn new(
        recipient: ClientId,
        id: MessageId,
        action: impl Into<String>,
        payload: Value,
    ) -> (Arc<Self>, ResponseFuture) {
        let (tx, rx) = oneshot::channel();
        let call = Arc::new(Self {
            recipient,
            id: id.clone(),
            action: action.into(),
            payload,
            send_state: SendState::default(),
            responder: Mutex::new(Some(tx)),
            delivered: AtomicBool::new(false),
        });
        (call, ResponseFuture { id, rx })
    }

    /// Deliver the correlated inbound response, resolving the future.
    ///
    /// Fails with [`CoreError::AlreadyResolved`] on duplicate delivery and
    /// with [`CoreError::Abandoned`] if the caller has stopped waiting.
    pub fn deliver_response(&self, response: Inbound) -> Result<(), CoreError> {
        let Some(tx) = self.responder.lock().take() else {
            return Err(CoreError::AlreadyResolved(self.id.clone()));
        };
        tx.send(response)
            .map_err(|_| CoreError::Abandoned(self.id.clone()))?;
        self.delivered.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Abandon the pending call; the response future resolves to
    /// [`CoreError::Abandoned`]. Returns `false` if already resolved.
    pub fn abandon(&self) -> bool {
        self.responder.lock().take().is_some()
    }

    /// Whether a response has been delivered.
    pub fn has_response(&self) -> bool {
        self.delivered.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for OutboundCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundCall")
            .field("recipient", &self.recipient)
            .field("id", &self.id)
            .field("action", &self.action)
            .field("sent", &self.send_state.is_sent())
            .field("has_response", &self.has_response())
            .finish_non_exhaustive()
    }
}

/// Resolves to the response correlated with an outbound call.
pub struct ResponseFuture {
    id: MessageId,
    rx: oneshot::Receiver<Inbound>,
}

impl ResponseFuture {
    /// The correlation id of the call this future belongs to.
    #[must_use]
    pub fn id(&self) -> &MessageId {
        &self.id
    }

    /// Wait for the response.
    pub async fn wait(self) -> Result<Inbound, CoreError> {
        self.rx.await.map_err(|_| CoreError::Abandoned(self.id))
    }
}
