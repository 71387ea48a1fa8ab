//! Capability surface of the external peer-connection engine.
//!
//! The core never performs ICE, DTLS or SDP negotiation itself. It starts a
//! peer through a [`PeerConnector`], feeds it remote descriptions and
//! candidates, and hears back only through [`PeerEvents`].

use std::sync::Arc;

use crate::types::{ConnectionState, Description, IceCandidate};

type DescriptionCallback = Arc<dyn Fn(Description) + Send + Sync>;
type CandidateCallback = Arc<dyn Fn(String, String) + Send + Sync>;
type StateCallback = Arc<dyn Fn(ConnectionState) + Send + Sync>;

/// Callbacks an engine invokes from its own threads.
#[derive(Clone)]
pub struct PeerEvents {
    on_local_description: DescriptionCallback,
    on_local_candidate: CandidateCallback,
    on_state_change: StateCallback,
}

impl PeerEvents {
    pub fn new(
        on_local_description: impl Fn(Description) + Send + Sync + 'static,
        on_local_candidate: impl Fn(String, String) + Send + Sync + 'static,
        on_state_change: impl Fn(ConnectionState) + Send + Sync + 'static,
    ) -> Self {
        Self {
            on_local_description: Arc::new(on_local_description),
            on_local_candidate: Arc::new(on_local_candidate),
            on_state_change: Arc::new(on_state_change),
        }
    }

    pub fn local_description(&self, description: Description) {
        (self.on_local_description)(description);
    }

    /// `mid` names the media section the candidate was gathered for.
    pub fn local_candidate(&self, candidate: String, mid: String) {
        (self.on_local_candidate)(candidate, mid);
    }

    pub fn state_changed(&self, state: ConnectionState) {
        (self.on_state_change)(state);
    }
}

/// Creates peer connections with the engine's configuration.
pub trait PeerConnector: Send + Sync {
    fn start(&self, events: PeerEvents) -> Box<dyn PeerConnection>;
}

/// One live peer connection. None of these calls may block.
pub trait PeerConnection: Send {
    fn set_remote_description(&mut self, description: &Description);
    fn add_remote_candidate(&mut self, candidate: &IceCandidate);
    fn close(&mut self);
}
