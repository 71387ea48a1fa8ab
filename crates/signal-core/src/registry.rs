use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use dashmap::{mapref::entry::Entry, DashMap};
use metrics::counter;
use serde::Serialize;
use tracing::{debug, info};

use crate::dispatcher::Dispatcher;
use crate::error::CreateSessionError;
use crate::peer::PeerConnector;
use crate::session::PeerSession;
use crate::types::{ConnectionState, SessionId};

#[derive(Debug, Clone, Default)]
pub struct RegistryConfig {
    /// Upper bound on live sessions; `None` means unbounded.
    pub max_sessions: Option<usize>,
}

/// Owns every live [`PeerSession`]. The only place sessions are created or destroyed.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    sessions: DashMap<SessionId, Arc<PeerSession>>,
    /// Slots held by live sessions and by creates in flight.
    reserved: AtomicUsize,
    dispatcher: Dispatcher,
    connector: Arc<dyn PeerConnector>,
    config: RegistryConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub state: ConnectionState,
    pub started: bool,
}

impl SessionRegistry {
    pub fn new(
        dispatcher: Dispatcher,
        connector: Arc<dyn PeerConnector>,
        config: RegistryConfig,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                sessions: DashMap::new(),
                reserved: AtomicUsize::new(0),
                dispatcher,
                connector,
                config,
            }),
        }
    }

    /// Registers a new session in state `New`. The session is not started.
    pub fn create(&self, id: SessionId) -> Result<Arc<PeerSession>, CreateSessionError> {
        if id == 0 {
            counter!("signal_sessions_rejected_total", 1, "reason" => "invalid_id");
            return Err(CreateSessionError::InvalidSessionId);
        }
        if !self.inner.reserve_slot() {
            counter!("signal_sessions_rejected_total", 1, "reason" => "capacity");
            return Err(CreateSessionError::ResourceUnavailable);
        }

        match self.inner.sessions.entry(id) {
            Entry::Occupied(_) => {
                self.inner.release_slot();
                counter!("signal_sessions_rejected_total", 1, "reason" => "duplicate");
                Err(CreateSessionError::AlreadyExists)
            }
            Entry::Vacant(entry) => {
                let registry = Arc::downgrade(&self.inner);
                let session = PeerSession::new(
                    id,
                    self.inner.dispatcher.clone(),
                    Arc::clone(&self.inner.connector),
                    Box::new(move |session: &PeerSession| release(&registry, session)),
                );
                entry.insert(Arc::clone(&session));
                counter!("signal_sessions_created_total", 1);
                info!(session_id = id, "session created");
                Ok(session)
            }
        }
    }

    pub fn get(&self, id: SessionId) -> Option<Arc<PeerSession>> {
        self.inner
            .sessions
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Removes and closes `id`. No-op if absent.
    pub fn close(&self, id: SessionId) {
        let removed = self.inner.sessions.remove(&id);
        if let Some((_, session)) = removed {
            self.inner.release_slot();
            session.close();
            counter!("signal_sessions_closed_total", 1);
            info!(session_id = id, "session removed");
        }
    }

    pub fn close_all(&self) {
        let ids: Vec<SessionId> = self
            .inner
            .sessions
            .iter()
            .map(|entry| *entry.key())
            .collect();
        for id in ids {
            self.close(id);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.sessions.is_empty()
    }

    pub fn snapshot(&self) -> Vec<SessionSnapshot> {
        let sessions: Vec<Arc<PeerSession>> = self
            .inner
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let mut snapshots: Vec<SessionSnapshot> = sessions
            .iter()
            .map(|session| SessionSnapshot {
                session_id: session.id(),
                state: session.state(),
                started: session.is_started(),
            })
            .collect();
        snapshots.sort_by_key(|snapshot| snapshot.session_id);
        snapshots
    }
}

impl RegistryInner {
    fn reserve_slot(&self) -> bool {
        let held = self.reserved.fetch_add(1, Ordering::AcqRel);
        match self.config.max_sessions {
            Some(max) if held >= max => {
                self.reserved.fetch_sub(1, Ordering::AcqRel);
                false
            }
            _ => true,
        }
    }

    fn release_slot(&self) {
        self.reserved.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Termination path: drop exactly this session instance, never a newer one
/// registered under the same id.
fn release(registry: &Weak<RegistryInner>, session: &PeerSession) {
    let Some(inner) = registry.upgrade() else {
        session.close();
        return;
    };
    let id = session.id();
    let removed = inner
        .sessions
        .remove_if(&id, |_, live| std::ptr::eq(Arc::as_ptr(live), session));
    session.close();
    if removed.is_some() {
        inner.release_slot();
        counter!("signal_sessions_closed_total", 1);
        info!(session_id = id, "terminated session removed");
    } else {
        debug!(session_id = id, "terminated session was already released");
    }
}
