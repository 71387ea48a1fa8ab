use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::dispatcher::Dispatcher;
use crate::error::{AttachSignalStreamError, IceCandidateError, SetRemoteDescriptionError};
use crate::peer::{PeerConnection, PeerConnector, PeerEvents};
use crate::sink::SignalingSink;
use crate::types::{ConnectionState, Description, IceCandidate, MediaIndex, SessionId};

/// Invoked once when a session reaches `Failed` or `Closed`.
pub type TerminationHook = Box<dyn FnOnce(&PeerSession) + Send>;

/// One negotiated peer connection and its state machine.
pub struct PeerSession {
    id: SessionId,
    dispatcher: Dispatcher,
    connector: Arc<dyn PeerConnector>,
    weak_self: Weak<PeerSession>,
    inner: Mutex<SessionInner>,
    on_terminated: Mutex<Option<TerminationHook>>,
}

struct SessionInner {
    state: ConnectionState,
    peer: Option<Box<dyn PeerConnection>>,
    remote_description_set: bool,
    sink: Option<Weak<dyn SignalingSink>>,
    media_index: MediaIndex,
    closed: bool,
}

impl PeerSession {
    pub fn new(
        id: SessionId,
        dispatcher: Dispatcher,
        connector: Arc<dyn PeerConnector>,
        on_terminated: TerminationHook,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            id,
            dispatcher,
            connector,
            weak_self: weak_self.clone(),
            inner: Mutex::new(SessionInner {
                state: ConnectionState::New,
                peer: None,
                remote_description_set: false,
                sink: None,
                media_index: MediaIndex::default(),
                closed: false,
            }),
            on_terminated: Mutex::new(Some(on_terminated)),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn is_started(&self) -> bool {
        self.inner.lock().peer.is_some()
    }

    /// Starts the external peer connection. No-op once started or closed.
    pub fn start(&self) {
        let mut inner = self.inner.lock();
        if inner.closed || inner.peer.is_some() {
            return;
        }
        let peer = self.connector.start(self.peer_events());
        inner.peer = Some(peer);
        inner.state = ConnectionState::New;
        debug!(session_id = self.id, "peer connection started");
    }

    /// Engine callbacks only hold a weak reference and hop onto the dispatcher
    /// before touching the session.
    fn peer_events(&self) -> PeerEvents {
        let on_description = {
            let weak = self.weak_self.clone();
            let dispatcher = self.dispatcher.clone();
            move |description: Description| {
                let weak = weak.clone();
                dispatcher.post(move || {
                    if let Some(session) = weak.upgrade() {
                        session.handle_local_description(description);
                    }
                });
            }
        };
        let on_candidate = {
            let weak = self.weak_self.clone();
            let dispatcher = self.dispatcher.clone();
            move |candidate: String, mid: String| {
                let weak = weak.clone();
                dispatcher.post(move || {
                    if let Some(session) = weak.upgrade() {
                        session.handle_local_candidate(candidate, mid);
                    }
                });
            }
        };
        let on_state = {
            let weak = self.weak_self.clone();
            let dispatcher = self.dispatcher.clone();
            move |state: ConnectionState| {
                let weak = weak.clone();
                dispatcher.post(move || {
                    if let Some(session) = weak.upgrade() {
                        session.handle_connection_state_change(state);
                    }
                });
            }
        };
        PeerEvents::new(on_description, on_candidate, on_state)
    }

    pub fn attach_signal_stream(
        &self,
        sink: Weak<dyn SignalingSink>,
    ) -> Result<(), AttachSignalStreamError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(AttachSignalStreamError::SessionClosed);
        }
        if sink.upgrade().is_none() {
            return Err(AttachSignalStreamError::InvalidSignalStream);
        }
        inner.sink = Some(sink);
        Ok(())
    }

    pub fn set_remote_description(
        &self,
        description: &Description,
    ) -> Result<(), SetRemoteDescriptionError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(SetRemoteDescriptionError::SessionClosed);
        }
        if description.sdp.is_empty() {
            return Err(SetRemoteDescriptionError::InvalidDescription);
        }
        let Some(peer) = inner.peer.as_mut() else {
            return Err(SetRemoteDescriptionError::PeerConnectionNotStarted);
        };
        peer.set_remote_description(description);
        inner.remote_description_set = true;
        debug!(session_id = self.id, kind = ?description.kind, "remote description applied");
        Ok(())
    }

    pub fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), IceCandidateError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(IceCandidateError::SessionClosed);
        }
        if !candidate.is_valid() {
            return Err(IceCandidateError::InvalidCandidate);
        }
        if !inner.remote_description_set {
            return Err(IceCandidateError::RemoteDescriptionNotSet);
        }
        let Some(peer) = inner.peer.as_mut() else {
            return Err(IceCandidateError::RemoteDescriptionNotSet);
        };
        peer.add_remote_candidate(candidate);
        trace!(session_id = self.id, mid = %candidate.sdp_mid, "remote candidate applied");
        Ok(())
    }

    /// Applies `next` if the transition table allows it; anything else is ignored.
    pub fn handle_connection_state_change(&self, next: ConnectionState) {
        let previous = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return;
            }
            if !inner.state.can_transition_to(next) {
                trace!(
                    session_id = self.id,
                    from = inner.state.as_str(),
                    to = next.as_str(),
                    "ignoring invalid state transition"
                );
                return;
            }
            std::mem::replace(&mut inner.state, next)
        };
        debug!(
            session_id = self.id,
            from = previous.as_str(),
            to = next.as_str(),
            "connection state changed"
        );

        match next {
            ConnectionState::Connected => {
                self.emit(|sink, id| sink.send_connection_state(ConnectionState::Connected, id));
            }
            ConnectionState::Failed | ConnectionState::Closed => self.terminate(),
            _ => {}
        }
    }

    fn handle_local_description(&self, description: Description) {
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return;
            }
            inner.media_index = MediaIndex::from_sdp(&description.sdp);
        }
        self.emit(move |sink, id| sink.send_local_description(&description, id));
    }

    fn handle_local_candidate(&self, candidate: String, mid: String) {
        let index = {
            let inner = self.inner.lock();
            if inner.closed {
                return;
            }
            inner.media_index.index_of(&mid)
        };
        let Some(sdp_mline_index) = index else {
            warn!(session_id = self.id, mid = %mid, "local candidate for unknown media section");
            return;
        };
        let candidate = IceCandidate::new(candidate, mid, sdp_mline_index);
        self.emit(move |sink, id| sink.send_ice_candidate(&candidate, id));
    }

    /// Defers a sink call onto the dispatcher. Both the session and the sink
    /// are resolved again when the task runs; either being gone makes it a no-op.
    fn emit<F>(&self, send: F)
    where
        F: FnOnce(&dyn SignalingSink, SessionId) + Send + 'static,
    {
        let weak = self.weak_self.clone();
        self.dispatcher.post(move || {
            let Some(session) = weak.upgrade() else {
                return;
            };
            if let Some(sink) = session.live_sink() {
                send(sink.as_ref(), session.id);
            }
        });
    }

    fn live_sink(&self) -> Option<Arc<dyn SignalingSink>> {
        let inner = self.inner.lock();
        if inner.closed {
            return None;
        }
        inner.sink.as_ref().and_then(Weak::upgrade)
    }

    fn terminate(&self) {
        let hook = self.on_terminated.lock().take();
        if let Some(hook) = hook {
            info!(session_id = self.id, state = self.state().as_str(), "session terminated");
            hook(self);
        }
    }

    /// Releases the peer connection and the sink. Idempotent.
    pub fn close(&self) {
        let peer = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return;
            }
            inner.closed = true;
            inner.media_index.clear();
            inner.sink = None;
            inner.remote_description_set = false;
            inner.peer.take()
        };
        self.on_terminated.lock().take();
        if let Some(mut peer) = peer {
            peer.close();
        }
        debug!(session_id = self.id, "session closed");
    }
}

impl Drop for PeerSession {
    fn drop(&mut self) {
        if let Some(mut peer) = self.inner.get_mut().peer.take() {
            peer.close();
        }
    }
}
