//! Endpoint lifecycle and traffic events.

use std::sync::Arc;

use ocppd_core::{ClientId, Inbound, Outbound};
use tokio::sync::broadcast;
use tracing::trace;

const DEFAULT_CAPACITY: usize = 256;

/// Something the endpoint did or observed.
#[derive(Clone, Debug)]
pub enum EndpointEvent {
    /// `listen()` was called; the transport is about to bind.
    ServerStarting,
    /// The transport is bound and accepting connections.
    ServerListening,
    /// `stop()` was called; connections are being torn down.
    ServerStopping,
    /// Shutdown finished.
    ServerStopped,
    /// A client handshake was accepted and its session created.
    ClientConnected(ClientId),
    /// A client's connection closed and its session was removed.
    ClientDisconnected(ClientId),
    /// An outbound message passed the full chain and was written.
    MessageSent(Arc<Outbound>),
    /// An inbound message was decoded, before the inbound chain runs.
    MessageReceived(Arc<Inbound>),
}

/// Broadcast-based event fan-out.
///
/// `emit` never awaits and never fails; slow receivers lag and drop
/// events rather than blocking the endpoint.
pub struct Events {
    tx: broadcast::Sender<EndpointEvent>,
}

impl Events {
    /// Create a fan-out with the default channel capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a fan-out with a custom channel capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to events emitted from this point on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EndpointEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all current subscribers. Fire-and-continue: a
    /// send with no subscribers is not an error.
    pub fn emit(&self, event: EndpointEvent) {
        trace!(?event, "endpoint event");
        let _ = self.tx.send(event);
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Events {
    fn default() -> Self {
        Self::new()
    }
}
