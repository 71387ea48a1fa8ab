use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use futures::{Stream, StreamExt};
use metrics::counter;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

use crate::dispatcher::Dispatcher;
use crate::error::ChannelError;
use crate::registry::SessionRegistry;
use crate::session::PeerSession;
use crate::sink::SignalingSink;
use crate::types::{
    ConnectionState, Description, IceCandidate, SessionId, SignalPayload, SignalingMessage,
};

/// Write half of the duplex channel backing one client connection.
pub trait ChannelWriter: Send + Sync {
    fn write(&self, message: SignalingMessage) -> Result<(), ChannelError>;
}

impl ChannelWriter for mpsc::UnboundedSender<SignalingMessage> {
    fn write(&self, message: SignalingMessage) -> Result<(), ChannelError> {
        self.send(message).map_err(|_| ChannelError::Closed)
    }
}

/// One client connection: routes inbound messages to sessions through the
/// dispatcher and serves as the sessions' [`SignalingSink`].
///
/// Sink methods write to the channel directly, so they must only be called
/// from dispatcher tasks.
pub struct SignalStream {
    dispatcher: Dispatcher,
    registry: SessionRegistry,
    writer: Box<dyn ChannelWriter>,
    closed: AtomicBool,
    close_notify: Notify,
    weak_self: Weak<SignalStream>,
}

impl SignalStream {
    pub fn new(
        dispatcher: Dispatcher,
        registry: SessionRegistry,
        writer: Box<dyn ChannelWriter>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            dispatcher,
            registry,
            writer,
            closed: AtomicBool::new(false),
            close_notify: Notify::new(),
            weak_self: weak_self.clone(),
        })
    }

    /// Reads until the channel ends, a read fails, or [`SignalStream::close`] is called.
    pub async fn run<S>(&self, inbound: S)
    where
        S: Stream<Item = Result<SignalingMessage, ChannelError>>,
    {
        futures::pin_mut!(inbound);
        while !self.is_closed() {
            let next = tokio::select! {
                next = inbound.next() => next,
                _ = self.close_notify.notified() => break,
            };
            match next {
                Some(Ok(message)) => self.route(message),
                Some(Err(ChannelError::Closed)) | None => {
                    debug!("signal channel ended");
                    break;
                }
                Some(Err(err)) => {
                    warn!(error = %err, "signal channel read failed");
                    break;
                }
            }
        }
        self.close();
    }

    fn route(&self, message: SignalingMessage) {
        let SignalingMessage {
            session_id,
            payload,
        } = message;
        counter!("signal_messages_routed_total", 1, "kind" => payload.kind());

        match payload {
            SignalPayload::State(ConnectionState::New) => self.create_session(session_id),
            SignalPayload::State(state) => self.with_session(session_id, move |session| {
                session.handle_connection_state_change(state);
            }),
            SignalPayload::Description(description) => {
                self.with_session(session_id, move |session| {
                    if let Err(err) = session.set_remote_description(&description) {
                        debug!(session_id, error = %err, "remote description rejected");
                    }
                })
            }
            SignalPayload::IceCandidate(candidate) => {
                self.with_session(session_id, move |session| {
                    if let Err(err) = session.add_ice_candidate(&candidate) {
                        debug!(session_id, error = %err, "remote candidate rejected");
                    }
                })
            }
        }
    }

    /// Creates the session, binds it to this stream and starts its peer.
    /// Failures are not reported to the client.
    fn create_session(&self, session_id: SessionId) {
        let weak = self.weak_self.clone();
        self.dispatcher.post(move || {
            let Some(stream) = weak.upgrade() else {
                return;
            };
            let session = match stream.registry.create(session_id) {
                Ok(session) => session,
                Err(err) => {
                    debug!(session_id, error = %err, "session creation rejected");
                    return;
                }
            };
            let sink: Weak<dyn SignalingSink> = stream.weak_self.clone();
            if let Err(err) = session.attach_signal_stream(sink) {
                debug!(session_id, error = %err, "could not attach signal stream");
            }
            session.start();
        });
    }

    fn with_session<F>(&self, session_id: SessionId, apply: F)
    where
        F: FnOnce(&PeerSession) + Send + 'static,
    {
        let weak = self.weak_self.clone();
        self.dispatcher.post(move || {
            let Some(stream) = weak.upgrade() else {
                return;
            };
            match stream.registry.get(session_id) {
                Some(session) => apply(&session),
                None => debug!(session_id, "no such session"),
            }
        });
    }

    /// Writes one message. The first failed write closes the stream.
    pub fn send(&self, message: SignalingMessage) {
        if self.is_closed() {
            return;
        }
        match self.writer.write(message) {
            Ok(()) => {
                counter!("signal_messages_sent_total", 1);
            }
            Err(err) => {
                warn!(error = %err, "signal channel write failed; closing stream");
                self.close();
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stops the read loop and suppresses further writes. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.close_notify.notify_one();
        info!("signal stream closed");
    }
}

impl SignalingSink for SignalStream {
    fn send_local_description(&self, description: &Description, session_id: SessionId) {
        self.send(SignalingMessage::description(session_id, description.clone()));
    }

    fn send_ice_candidate(&self, candidate: &IceCandidate, session_id: SessionId) {
        self.send(SignalingMessage::ice_candidate(session_id, candidate.clone()));
    }

    fn send_connection_state(&self, state: ConnectionState, session_id: SessionId) {
        self.send(SignalingMessage::state(session_id, state));
    }
}
