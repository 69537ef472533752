//! Session gate: admits at most [`MAX_CLIENTS`] operators at a time.
//!
//! Each admitted connection receives an [`Admission`] carrying an eviction
//! signal.  `evict_all` fires every signal, which is how shutdown forces open
//! sessions to close.
//!
//! ```text
//! admit ──► Admitted ──► (touch ...) ──► remove
//!   │                        │
//!   └─ Full: state unchanged └─ evict_all: signal fired, entry dropped
//! ```

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::config::MAX_CLIENTS;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GateError {
    #[error("Maximum number of clients reached")]
    Full,

    #[error("client {0} is already admitted")]
    AlreadyAdmitted(Uuid),
}

/// An admitted operator connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSession {
    pub id: Uuid,
    pub connected_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

/// Returned by a successful [`SessionGate::admit`].
#[derive(Debug)]
pub struct Admission {
    pub session: ClientSession,
    /// Resolves when the gate evicts this session.
    pub evicted: oneshot::Receiver<()>,
}

struct Entry {
    session: ClientSession,
    evict: oneshot::Sender<()>,
}

pub struct SessionGate {
    max_clients: usize,
    sessions: Mutex<HashMap<Uuid, Entry>>,
}

impl Default for SessionGate {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionGate {
    pub fn new() -> Self {
        Self::with_capacity(MAX_CLIENTS)
    }

    pub fn with_capacity(max_clients: usize) -> Self {
        Self {
            max_clients,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Admits `id` if a slot is free.  A rejection leaves the gate untouched.
    pub fn admit(&self, id: Uuid) -> Result<Admission, GateError> {
        let mut sessions = self.lock();
        if sessions.len() >= self.max_clients {
            return Err(GateError::Full);
        }
        if sessions.contains_key(&id) {
            return Err(GateError::AlreadyAdmitted(id));
        }

        let now = Utc::now();
        let session = ClientSession {
            id,
            connected_at: now,
            last_activity_at: now,
        };
        let (evict, evicted) = oneshot::channel();
        sessions.insert(
            id,
            Entry {
                session: session.clone(),
                evict,
            },
        );
        info!("client {id} admitted ({}/{})", sessions.len(), self.max_clients);
        Ok(Admission { session, evicted })
    }

    /// Returns the session if it was present.
    pub fn remove(&self, id: Uuid) -> Option<ClientSession> {
        let removed = self.lock().remove(&id).map(|e| e.session);
        if removed.is_some() {
            info!("client {id} removed");
        }
        removed
    }

    /// Records activity; returns `false` for unknown ids.
    pub fn touch(&self, id: Uuid) -> bool {
        match self.lock().get_mut(&id) {
            Some(entry) => {
                entry.session.last_activity_at = Utc::now();
                true
            }
            None => false,
        }
    }

    pub fn count(&self) -> usize {
        self.lock().len()
    }

    pub fn has_capacity(&self) -> bool {
        self.count() < self.max_clients
    }

    pub fn get(&self, id: Uuid) -> Option<ClientSession> {
        self.lock().get(&id).map(|e| e.session.clone())
    }

    /// Signals every admitted session to disconnect and empties the gate.
    /// Returns the number of sessions evicted.
    pub fn evict_all(&self) -> usize {
        let drained: Vec<Entry> = self.lock().drain().map(|(_, e)| e).collect();
        let count = drained.len();
        for entry in drained {
            // The receiver is gone if the session already ended on its own.
            if entry.evict.send(()).is_err() {
                debug!("client {} had already disconnected", entry.session.id);
            }
        }
        if count > 0 {
            info!("evicted {count} client(s)");
        }
        count
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, Entry>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
