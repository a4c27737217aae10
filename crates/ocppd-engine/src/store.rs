//! Shared session store, keyed by client identity.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use ocppd_core::ClientId;

use crate::errors::EngineError;
use crate::session::Session;

/// Mapping from client identity to its active [`Session`].
///
/// Shared across all connections. `add` is atomic with respect to the
/// existence check it guards: two concurrent `add`s for the same identity
/// cannot both succeed.
#[derive(Default)]
pub struct SessionStore {
    sessions: DashMap<ClientId, Arc<Session>>,
}

impl SessionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a session exists for the given client.
    #[must_use]
    pub fn has(&self, client: &ClientId) -> bool {
        self.sessions.contains_key(client)
    }

    /// Add a session; fails if the client already has one.
    pub fn add(&self, session: Arc<Session>) -> Result<(), EngineError> {
        match self.sessions.entry(session.client().clone()) {
            Entry::Occupied(_) => Err(EngineError::AlreadyConnected(session.client().clone())),
            Entry::Vacant(slot) => {
                let _ = slot.insert(session);
                Ok(())
            }
        }
    }

    /// Remove and return a session; fails if the client has none.
    pub fn remove(&self, client: &ClientId) -> Result<Arc<Session>, EngineError> {
        self.sessions
            .remove(client)
            .map(|(_, session)| session)
            .ok_or_else(|| EngineError::NotConnected(client.clone()))
    }

    /// Look up a session; fails if the client has none.
    pub fn get(&self, client: &ClientId) -> Result<Arc<Session>, EngineError> {
        self.sessions
            .get(client)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| EngineError::NotConnected(client.clone()))
    }

    /// Remove and return every session (endpoint shutdown).
    pub fn drain(&self) -> Vec<Arc<Session>> {
        let clients: Vec<ClientId> = self
            .sessions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        clients
            .into_iter()
            .filter_map(|client| self.sessions.remove(&client).map(|(_, session)| session))
            .collect()
    }

    /// Number of active sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no sessions exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
