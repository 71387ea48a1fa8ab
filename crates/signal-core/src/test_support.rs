use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::dispatcher::Dispatcher;
use crate::peer::{PeerConnection, PeerConnector, PeerEvents};
use crate::sink::SignalingSink;
use crate::types::{ConnectionState, Description, IceCandidate, SessionId};

/// Waits until everything posted so far has run.
pub fn flush(dispatcher: &Dispatcher) {
    let (tx, rx) = std_mpsc::channel();
    dispatcher.post(move || {
        let _ = tx.send(());
    });
    rx.recv_timeout(Duration::from_secs(5))
        .expect("dispatcher did not drain in time");
}

#[derive(Default)]
struct ConnectorLog {
    events: Vec<PeerEvents>,
    remote_descriptions: Vec<Description>,
    remote_candidates: Vec<IceCandidate>,
    closed: usize,
}

#[derive(Default, Clone)]
pub struct RecordingConnector {
    log: Arc<Mutex<ConnectorLog>>,
}

impl RecordingConnector {
    pub fn events(&self, peer: usize) -> PeerEvents {
        self.log.lock().events[peer].clone()
    }

    pub fn started(&self) -> usize {
        self.log.lock().events.len()
    }

    pub fn remote_descriptions(&self) -> Vec<Description> {
        self.log.lock().remote_descriptions.clone()
    }

    pub fn remote_candidates(&self) -> Vec<IceCandidate> {
        self.log.lock().remote_candidates.clone()
    }

    pub fn closed_peers(&self) -> usize {
        self.log.lock().closed
    }
}

impl PeerConnector for RecordingConnector {
    fn start(&self, events: PeerEvents) -> Box<dyn PeerConnection> {
        self.log.lock().events.push(events);
        Box::new(RecordingPeer {
            log: Arc::clone(&self.log),
            closed: false,
        })
    }
}

struct RecordingPeer {
    log: Arc<Mutex<ConnectorLog>>,
    closed: bool,
}

impl PeerConnection for RecordingPeer {
    fn set_remote_description(&mut self, description: &Description) {
        self.log.lock().remote_descriptions.push(description.clone());
    }

    fn add_remote_candidate(&mut self, candidate: &IceCandidate) {
        self.log.lock().remote_candidates.push(candidate.clone());
    }

    fn close(&mut self) {
        if !std::mem::replace(&mut self.closed, true) {
            self.log.lock().closed += 1;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Description(SessionId, Description),
    Candidate(SessionId, IceCandidate),
    State(SessionId, ConnectionState),
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().clone()
    }
}

impl SignalingSink for RecordingSink {
    fn send_local_description(&self, description: &Description, session_id: SessionId) {
        self.events
            .lock()
            .push(SinkEvent::Description(session_id, description.clone()));
    }

    fn send_ice_candidate(&self, candidate: &IceCandidate, session_id: SessionId) {
        self.events
            .lock()
            .push(SinkEvent::Candidate(session_id, candidate.clone()));
    }

    fn send_connection_state(&self, state: ConnectionState, session_id: SessionId) {
        self.events.lock().push(SinkEvent::State(session_id, state));
    }
}
