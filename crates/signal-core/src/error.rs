use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CreateSessionError {
    #[error("session already exists")]
    AlreadyExists,
    #[error("invalid session id")]
    InvalidSessionId,
    #[error("session capacity exhausted")]
    ResourceUnavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AttachSignalStreamError {
    #[error("session closed")]
    SessionClosed,
    #[error("signal stream is no longer alive")]
    InvalidSignalStream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SetRemoteDescriptionError {
    #[error("session closed")]
    SessionClosed,
    #[error("description has an empty sdp")]
    InvalidDescription,
    #[error("peer connection not started")]
    PeerConnectionNotStarted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum IceCandidateError {
    #[error("session closed")]
    SessionClosed,
    #[error("invalid ice candidate")]
    InvalidCandidate,
    #[error("remote description not set")]
    RemoteDescriptionNotSet,
}

/// Failures of the duplex channel backing a signal stream.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("signal channel closed")]
    Closed,
    #[error("signal channel transport error: {0}")]
    Transport(String),
}
