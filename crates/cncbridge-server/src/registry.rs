//! Session registry
//!
//! Tracks every connected session and fans motion and drive traffic out
//! to them. Membership lives behind one lock, so admission against the
//! session limit is atomic. Broadcasts deliver without holding the lock
//! and evict any session whose queue is closed or full.

use chrono::{DateTime, Utc};
use cncbridge_core::CapacityError;
use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Opaque session identifier
pub type SessionId = Uuid;

/// A registered session's outbound side
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    registered_at: DateTime<Utc>,
    tx: mpsc::Sender<String>,
}

impl SessionHandle {
    /// New session with a fresh id delivering into `tx`
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            registered_at: Utc::now(),
            tx,
        }
    }

    /// Session id
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Queue a message; fails if the queue is closed or full
    pub fn try_send(&self, text: String) -> bool {
        self.tx.try_send(text).is_ok()
    }
}

/// Public view of a registered session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionInfo {
    /// Session id
    pub id: SessionId,
    /// When the session was admitted
    pub registered_at: DateTime<Utc>,
}

/// Set of connected sessions, bounded by `max_clients`
#[derive(Debug)]
pub struct ClientRegistry {
    sessions: RwLock<HashMap<SessionId, SessionHandle>>,
    max_clients: usize,
}

impl ClientRegistry {
    /// Create an empty registry
    pub fn new(max_clients: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_clients,
        }
    }

    /// Admit a session unless the registry is full
    pub fn register(&self, session: SessionHandle) -> Result<(), CapacityError> {
        let mut sessions = self.sessions.write();
        if sessions.len() >= self.max_clients {
            return Err(CapacityError {
                max: self.max_clients,
            });
        }
        tracing::info!(
            "Session {} registered ({}/{})",
            session.id,
            sessions.len() + 1,
            self.max_clients
        );
        sessions.insert(session.id, session);
        Ok(())
    }

    /// Remove a session; returns whether it was present
    pub fn unregister(&self, id: SessionId) -> bool {
        let removed = self.sessions.write().remove(&id).is_some();
        if removed {
            tracing::info!("Session {} unregistered", id);
        }
        removed
    }

    /// Deliver `text` to every session, evicting those that cannot take it
    ///
    /// Returns the number of sessions that received the message.
    pub fn broadcast(&self, text: &str) -> usize {
        let snapshot: Vec<(SessionId, mpsc::Sender<String>)> = self
            .sessions
            .read()
            .values()
            .map(|s| (s.id, s.tx.clone()))
            .collect();

        let mut failed = Vec::new();
        for (id, tx) in &snapshot {
            if tx.try_send(text.to_string()).is_err() {
                failed.push(*id);
            }
        }

        if !failed.is_empty() {
            let mut sessions = self.sessions.write();
            for id in &failed {
                if sessions.remove(id).is_some() {
                    tracing::warn!("Evicted session {}: delivery failed", id);
                }
            }
        }

        snapshot.len() - failed.len()
    }

    /// Deliver `text` to one session
    pub fn send_to(&self, id: SessionId, text: &str) -> bool {
        self.sessions
            .read()
            .get(&id)
            .is_some_and(|s| s.try_send(text.to_string()))
    }

    /// Check if a session is registered
    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.read().contains_key(&id)
    }

    /// Registered sessions
    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.sessions
            .read()
            .values()
            .map(|s| SessionInfo {
                id: s.id,
                registered_at: s.registered_at,
            })
            .collect()
    }

    /// Number of registered sessions
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Check if no session is registered
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Check if the next registration would be refused
    pub fn is_full(&self) -> bool {
        self.len() >= self.max_clients
    }

    /// Configured session limit
    pub fn max_clients(&self) -> usize {
        self.max_clients
    }
}
