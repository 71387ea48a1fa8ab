use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use signal_core::{
    ConnectionState, Description, DescriptionType, IceCandidate, PeerConnection, PeerConnector,
    PeerEvents,
};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::Error as WebRtcError;

/// [`PeerConnector`] backed by webrtc-rs. Each peer runs as a task on
/// `runtime`, driven by commands from its session.
pub struct WebRtcConnector {
    api: Arc<API>,
    config: RTCConfiguration,
    runtime: Handle,
}

impl WebRtcConnector {
    pub fn new(ice_servers: &[String], runtime: Handle) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .context("failed to register default codecs")?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .context("failed to register default interceptors")?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let mut config = RTCConfiguration::default();
        if !ice_servers.is_empty() {
            config.ice_servers = vec![RTCIceServer {
                urls: ice_servers.to_vec(),
                ..Default::default()
            }];
        }

        Ok(Self {
            api: Arc::new(api),
            config,
            runtime,
        })
    }
}

impl PeerConnector for WebRtcConnector {
    fn start(&self, events: PeerEvents) -> Box<dyn PeerConnection> {
        let (commands, receiver) = mpsc::unbounded_channel();
        self.runtime.spawn(run_peer(
            Arc::clone(&self.api),
            self.config.clone(),
            events,
            receiver,
        ));
        Box::new(WebRtcPeer { commands })
    }
}

enum PeerCommand {
    SetRemote(Description),
    AddCandidate(IceCandidate),
    Close,
}

struct WebRtcPeer {
    commands: mpsc::UnboundedSender<PeerCommand>,
}

impl WebRtcPeer {
    fn send(&self, command: PeerCommand) {
        if self.commands.send(command).is_err() {
            debug!("peer task already gone; command dropped");
        }
    }
}

impl PeerConnection for WebRtcPeer {
    fn set_remote_description(&mut self, description: &Description) {
        self.send(PeerCommand::SetRemote(description.clone()));
    }

    fn add_remote_candidate(&mut self, candidate: &IceCandidate) {
        self.send(PeerCommand::AddCandidate(candidate.clone()));
    }

    fn close(&mut self) {
        self.send(PeerCommand::Close);
    }
}

async fn run_peer(
    api: Arc<API>,
    config: RTCConfiguration,
    events: PeerEvents,
    mut commands: mpsc::UnboundedReceiver<PeerCommand>,
) {
    let peer = match api.new_peer_connection(config).await {
        Ok(peer) => peer,
        Err(err) => {
            warn!(error = %err, "failed to create peer connection");
            events.state_changed(ConnectionState::Closed);
            return;
        }
    };

    let candidates = Arc::new(LocalCandidates::new(events.clone()));
    let gathered = Arc::clone(&candidates);
    peer.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        if let Some(candidate) = candidate {
            match candidate.to_json() {
                Ok(init) => gathered.gathered(init.candidate),
                Err(err) => warn!(error = %err, "failed to serialise local candidate"),
            }
        }
        Box::pin(async {})
    }));

    let state_events = events;
    peer.on_peer_connection_state_change(Box::new(move |state| {
        if let Some(state) = map_state(state) {
            state_events.state_changed(state);
        }
        Box::pin(async {})
    }));

    while let Some(command) = commands.recv().await {
        match command {
            PeerCommand::SetRemote(description) => {
                if let Err(err) = apply_remote_description(&peer, description, &candidates).await
                {
                    warn!(error = %err, "failed to apply remote description");
                }
            }
            PeerCommand::AddCandidate(candidate) => {
                let init = RTCIceCandidateInit {
                    candidate: candidate.candidate,
                    sdp_mid: Some(candidate.sdp_mid),
                    sdp_mline_index: u16::try_from(candidate.sdp_mline_index).ok(),
                    username_fragment: None,
                };
                if let Err(err) = peer.add_ice_candidate(init).await {
                    warn!(error = %err, "failed to add remote candidate");
                }
            }
            PeerCommand::Close => break,
        }
    }

    if let Err(err) = peer.close().await {
        debug!(error = %err, "peer connection close failed");
    }
}

/// Applies a remote description. An offer is answered immediately; the
/// answer is reported once it has been applied locally.
async fn apply_remote_description(
    peer: &RTCPeerConnection,
    description: Description,
    candidates: &LocalCandidates,
) -> Result<(), WebRtcError> {
    let kind = description.kind;
    let remote = match kind {
        DescriptionType::Offer => RTCSessionDescription::offer(description.sdp)?,
        DescriptionType::Answer => RTCSessionDescription::answer(description.sdp)?,
        DescriptionType::ProvisionalAnswer => RTCSessionDescription::pranswer(description.sdp)?,
        DescriptionType::Rollback | DescriptionType::Unspecified => {
            warn!(kind = ?kind, "unsupported remote description type; ignoring");
            return Ok(());
        }
    };
    peer.set_remote_description(remote).await?;

    if kind == DescriptionType::Offer {
        let answer = peer.create_answer(None).await?;
        peer.set_local_description(answer).await?;
        match peer.local_description().await {
            Some(local) => {
                candidates.description_applied(Description::new(local.sdp, DescriptionType::Answer))
            }
            None => warn!("answer applied but no local description available"),
        }
    }
    Ok(())
}

/// Orders local candidates behind the description they belong to.
///
/// webrtc-rs does not report a media identifier for gathered candidates, and
/// gathering starts while the answer is still being applied. Candidates are
/// held until a local description has been reported, then tagged with its
/// first media section, which carries the whole BUNDLE group.
struct LocalCandidates {
    events: PeerEvents,
    state: Mutex<CandidateState>,
}

#[derive(Default)]
struct CandidateState {
    mid: Option<String>,
    pending: Vec<String>,
}

impl LocalCandidates {
    fn new(events: PeerEvents) -> Self {
        Self {
            events,
            state: Mutex::new(CandidateState::default()),
        }
    }

    fn gathered(&self, candidate: String) {
        let mut state = self.state.lock();
        match state.mid.clone() {
            Some(mid) => self.events.local_candidate(candidate, mid),
            None => state.pending.push(candidate),
        }
    }

    fn description_applied(&self, description: Description) {
        let mut state = self.state.lock();
        let mid = bundle_mid(&description.sdp);
        self.events.local_description(description);
        match mid {
            Some(mid) => {
                for candidate in std::mem::take(&mut state.pending) {
                    self.events.local_candidate(candidate, mid.clone());
                }
                state.mid = Some(mid);
            }
            None => warn!("local description carries no media section; candidates withheld"),
        }
    }
}

/// `a=mid:` of the first media section.
fn bundle_mid(sdp: &str) -> Option<String> {
    sdp.lines()
        .map(str::trim)
        .skip_while(|line| !line.starts_with("m="))
        .find_map(|line| line.strip_prefix("a=mid:"))
        .map(|mid| mid.trim().to_string())
}

fn map_state(state: RTCPeerConnectionState) -> Option<ConnectionState> {
    match state {
        RTCPeerConnectionState::New => Some(ConnectionState::New),
        RTCPeerConnectionState::Connecting => Some(ConnectionState::Connecting),
        RTCPeerConnectionState::Connected => Some(ConnectionState::Connected),
        RTCPeerConnectionState::Disconnected => Some(ConnectionState::Disconnected),
        RTCPeerConnectionState::Failed => Some(ConnectionState::Failed),
        RTCPeerConnectionState::Closed => Some(ConnectionState::Closed),
        RTCPeerConnectionState::Unspecified => None,
    }
}
