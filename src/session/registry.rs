// ABOUTME: Session registry keyed by peer id
// ABOUTME: Thread-safe map that destroyed sessions remove themselves from

use crate::config::SessionConfig;
use crate::session::connection::Session;
use crate::session::transport::{Signaller, VoiceTransport};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

pub(crate) struct RegistryInner {
    sessions: RwLock<HashMap<String, Session>>,
}

impl RegistryInner {
    /// Remove `session` if it is still the entry for `id`
    pub(crate) fn remove(&self, id: &str, session: &Session) {
        let mut sessions = self.sessions.write();
        if sessions.get(id).is_some_and(|entry| entry.ptr_eq(session)) {
            sessions.remove(id);
            log::info!("Session {} removed, total sessions: {}", id, sessions.len());
        }
    }
}

/// Owns the live sessions, one per remote peer
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                sessions: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Create and register a session
    ///
    /// An existing session with the same id is destroyed first.
    pub fn create(
        &self,
        id: impl Into<String>,
        transport: Arc<dyn VoiceTransport>,
        signaller: Arc<dyn Signaller>,
        config: SessionConfig,
    ) -> Session {
        let id = id.into();
        let session = Session::new(id.clone(), transport, signaller, config);
        session.attach_registry(Arc::downgrade(&self.inner));

        let previous = {
            let mut sessions = self.inner.sessions.write();
            let previous = sessions.insert(id.clone(), session.clone());
            log::info!("Session {} added, total sessions: {}", id, sessions.len());
            previous
        };

        if let Some(previous) = previous {
            log::debug!("Replacing existing session {}", id);
            previous.destroy();
        }

        session
    }

    /// Look up a session by id
    pub fn get(&self, id: &str) -> Option<Session> {
        self.inner.sessions.read().get(id).cloned()
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.inner.sessions.read().len()
    }

    /// Whether no sessions are registered
    pub fn is_empty(&self) -> bool {
        self.inner.sessions.read().is_empty()
    }

    /// Ids of all live sessions
    pub fn ids(&self) -> Vec<String> {
        self.inner.sessions.read().keys().cloned().collect()
    }

    /// Destroy every session
    pub fn destroy_all(&self) {
        let sessions: Vec<Session> = self.inner.sessions.read().values().cloned().collect();
        for session in sessions {
            session.destroy();
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.ids())
            .finish()
    }
}
