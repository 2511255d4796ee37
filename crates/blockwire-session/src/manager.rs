//! The set of live sessions.
//!
//! Sessions add themselves on accept and remove themselves on disconnect,
//! from whatever thread that happens on, so the set is a concurrent map
//! rather than something owned by one task.

use std::sync::Arc;

use blockwire_protocol::{Message, ProtocolState};
use blockwire_transport::ConnectionId;
use dashmap::DashMap;

use crate::Session;

/// Concurrent map of every connected session.
#[derive(Default)]
pub struct SessionSet {
    sessions: DashMap<ConnectionId, Arc<Session>>,
}

impl SessionSet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Adds `session`. It removes itself again when it disconnects.
    ///
    /// Sessions that are already closed are not added.
    pub fn insert(self: &Arc<Self>, session: Arc<Session>) {
        session.attach(Arc::downgrade(self));
        if !session.is_active() {
            return;
        }
        self.sessions.insert(session.id(), Arc::clone(&session));
        // A disconnect racing with the insert may have missed the entry.
        if !session.is_active() {
            self.sessions.remove(&session.id());
        }
    }

    pub fn remove(&self, id: ConnectionId) -> Option<Arc<Session>> {
        self.sessions.remove(&id).map(|(_, session)| session)
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<Session>> {
        self.sessions.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Copies the current members out so callers never hold a map guard
    /// while calling into a session, which may remove itself.
    pub fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Pulses every session once. Returns how many were pulsed.
    pub fn pulse_all(&self) -> usize {
        let sessions = self.snapshot();
        for session in &sessions {
            session.pulse();
        }
        sessions.len()
    }

    /// Sends `message` to every session in PLAY. Returns how many accepted
    /// it.
    ///
    /// Kinds bound to a broadcast cache are processed and encoded once for
    /// all recipients.
    pub fn broadcast(&self, message: impl Into<Message>) -> usize {
        let message = message.into();
        let mut delivered = 0;
        for session in self.snapshot() {
            if session.protocol_state() != ProtocolState::Play {
                continue;
            }
            match session.send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => tracing::debug!(
                    session = %session.id(),
                    error = %e,
                    "broadcast not delivered"
                ),
            }
        }
        delivered
    }

    /// Names of logged-in players.
    pub fn online_players(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.protocol_state() == ProtocolState::Play)
            .filter_map(|entry| entry.player_name().map(str::to_owned))
            .collect();
        names.sort();
        names
    }
}
