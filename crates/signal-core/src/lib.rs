//! Session orchestration for the signaling relay.
//!
//! Inbound messages, engine callbacks and teardown paths all funnel through a
//! single [`Dispatcher`], which turns a many-writer problem into a
//! single-writer one: session mutations and stream writes never overlap.

pub mod dispatcher;
pub mod error;
pub mod peer;
pub mod registry;
pub mod session;
pub mod sink;
pub mod stream;
pub mod types;

#[cfg(test)]
mod test_support;

pub use dispatcher::Dispatcher;
pub use error::{
    AttachSignalStreamError, ChannelError, CreateSessionError, IceCandidateError,
    SetRemoteDescriptionError,
};
pub use peer::{PeerConnection, PeerConnector, PeerEvents};
pub use registry::{RegistryConfig, SessionRegistry, SessionSnapshot};
pub use session::PeerSession;
pub use sink::SignalingSink;
pub use stream::{ChannelWriter, SignalStream};
pub use types::{
    ConnectionState, Description, DescriptionType, IceCandidate, MediaIndex, SessionId,
    SignalPayload, SignalingMessage,
};
