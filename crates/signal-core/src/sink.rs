use crate::types::{ConnectionState, Description, IceCandidate, SessionId};

/// Outbound side of signaling, as seen by a peer session.
///
/// Sessions only call into a sink from dispatcher tasks, so implementations
/// never see two calls at once.
pub trait SignalingSink: Send + Sync {
    fn send_local_description(&self, description: &Description, session_id: SessionId);
    fn send_ice_candidate(&self, candidate: &IceCandidate, session_id: SessionId);
    fn send_connection_state(&self, state: ConnectionState, session_id: SessionId);
}
