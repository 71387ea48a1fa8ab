use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Client supplied identifier correlating every message of one peer connection attempt.
pub type SessionId = u32;

/// Connection state of a peer session.
///
/// The variants are only ordered by [`ConnectionState::can_transition_to`], never numerically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// Returns whether `self -> next` is part of the session transition table.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (New, Connecting)
                | (New, Closed)
                | (Connecting, Connected)
                | (Connecting, Failed)
                | (Connected, Disconnected)
                | (Connected, Closed)
        )
    }

    /// Entering a terminal state tears the session down.
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Failed | ConnectionState::Closed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::New => "new",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Failed => "failed",
            ConnectionState::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DescriptionType {
    #[default]
    Unspecified,
    Offer,
    Answer,
    #[serde(rename = "pranswer")]
    ProvisionalAnswer,
    Rollback,
}

/// A local or remote session description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Description {
    pub sdp: String,
    #[serde(rename = "type", default)]
    pub kind: DescriptionType,
}

impl Description {
    pub fn new(sdp: impl Into<String>, kind: DescriptionType) -> Self {
        Self {
            sdp: sdp.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: String,
    pub sdp_mline_index: i32,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>, sdp_mid: impl Into<String>, sdp_mline_index: i32) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: sdp_mid.into(),
            sdp_mline_index,
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.candidate.is_empty() && !self.sdp_mid.is_empty() && self.sdp_mline_index >= 0
    }
}

/// Payload carried by a [`SignalingMessage`]; exactly one per message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalPayload {
    Description(Description),
    IceCandidate(IceCandidate),
    State(ConnectionState),
}

impl SignalPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            SignalPayload::Description(_) => "description",
            SignalPayload::IceCandidate(_) => "ice_candidate",
            SignalPayload::State(_) => "state",
        }
    }
}

/// The only shape exchanged with a client, in either direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalingMessage {
    pub session_id: SessionId,
    #[serde(flatten)]
    pub payload: SignalPayload,
}

impl SignalingMessage {
    pub fn description(session_id: SessionId, description: Description) -> Self {
        Self {
            session_id,
            payload: SignalPayload::Description(description),
        }
    }

    pub fn ice_candidate(session_id: SessionId, candidate: IceCandidate) -> Self {
        Self {
            session_id,
            payload: SignalPayload::IceCandidate(candidate),
        }
    }

    pub fn state(session_id: SessionId, state: ConnectionState) -> Self {
        Self {
            session_id,
            payload: SignalPayload::State(state),
        }
    }
}

/// Maps media identifiers (`a=mid:`) to the zero-based index of their `m=` section.
///
/// Only valid for the description it was built from; a new local description
/// replaces the whole map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaIndex {
    by_mid: HashMap<String, i32>,
}

impl MediaIndex {
    pub fn from_sdp(sdp: &str) -> Self {
        let mut by_mid = HashMap::new();
        let mut section: i32 = -1;
        for line in sdp.lines() {
            let line = line.trim_end_matches('\r');
            if line.starts_with("m=") {
                section += 1;
            } else if let Some(mid) = line.strip_prefix("a=mid:") {
                if section >= 0 {
                    by_mid.insert(mid.trim().to_string(), section);
                }
            }
        }
        Self { by_mid }
    }

    pub fn index_of(&self, mid: &str) -> Option<i32> {
        self.by_mid.get(mid).copied()
    }

    pub fn clear(&mut self) {
        self.by_mid.clear();
    }

    pub fn len(&self) -> usize {
        self.by_mid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_mid.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATES: [ConnectionState; 6] = [
        ConnectionState::New,
        ConnectionState::Connecting,
        ConnectionState::Connected,
        ConnectionState::Disconnected,
        ConnectionState::Failed,
        ConnectionState::Closed,
    ];

    #[test_timeout::timeout]
    fn transition_table_matches_allowed_pairs() {
        use ConnectionState::*;
        let allowed = [
            (New, Connecting),
            (New, Closed),
            (Connecting, Connected),
            (Connecting, Failed),
            (Connected, Disconnected),
            (Connected, Closed),
        ];
        for from in ALL_STATES {
            for to in ALL_STATES {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{from:?} -> {to:?}"
                );
            }
        }
    }

    #[test_timeout::timeout]
    fn terminal_states_accept_nothing() {
        for from in [
            ConnectionState::Disconnected,
            ConnectionState::Failed,
            ConnectionState::Closed,
        ] {
            assert!(ALL_STATES.iter().all(|to| !from.can_transition_to(*to)));
        }
        assert!(ConnectionState::Failed.is_terminal());
        assert!(ConnectionState::Closed.is_terminal());
        assert!(!ConnectionState::Disconnected.is_terminal());
    }

    #[test_timeout::timeout]
    fn media_index_follows_m_lines() {
        let sdp = "v=0\r\n\
                   o=- 0 0 IN IP4 127.0.0.1\r\n\
                   s=-\r\n\
                   a=group:BUNDLE audio video data\r\n\
                   m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
                   a=mid:audio\r\n\
                   m=video 9 UDP/TLS/RTP/SAVPF 96\r\n\
                   a=mid:video\r\n\
                   m=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n\
                   a=mid:data\r\n";
        let index = MediaIndex::from_sdp(sdp);
        assert_eq!(index.len(), 3);
        assert_eq!(index.index_of("audio"), Some(0));
        assert_eq!(index.index_of("video"), Some(1));
        assert_eq!(index.index_of("data"), Some(2));
        assert_eq!(index.index_of("missing"), None);
    }

    #[test_timeout::timeout]
    fn session_level_mid_is_ignored() {
        let index = MediaIndex::from_sdp("v=0\na=mid:bogus\nm=application 9 DTLS/SCTP 5000\na=mid:0\n");
        assert_eq!(index.index_of("bogus"), None);
        assert_eq!(index.index_of("0"), Some(0));
    }

    #[test_timeout::timeout]
    fn candidate_validation() {
        assert!(IceCandidate::new("candidate:1 1 UDP 1 10.0.0.1 5000 typ host", "0", 0).is_valid());
        assert!(!IceCandidate::new("", "0", 0).is_valid());
        assert!(!IceCandidate::new("candidate:1", "", 0).is_valid());
        assert!(!IceCandidate::new("candidate:1", "0", -1).is_valid());
    }

    #[test_timeout::timeout]
    fn wire_shape_puts_payload_beside_session_id() {
        let message = SignalingMessage::description(
            7,
            Description::new("v=0", DescriptionType::Offer),
        );
        let value = serde_json::to_value(&message).expect("serialize");
        assert_eq!(
            value,
            serde_json::json!({
                "session_id": 7,
                "description": { "sdp": "v=0", "type": "offer" }
            })
        );

        let state: SignalingMessage =
            serde_json::from_str(r#"{"session_id":9,"state":"new"}"#).expect("decode state");
        assert_eq!(state, SignalingMessage::state(9, ConnectionState::New));

        let candidate: SignalingMessage = serde_json::from_str(
            r#"{"session_id":9,"ice_candidate":{"candidate":"c","sdp_mid":"0","sdp_mline_index":-1}}"#,
        )
        .expect("decode candidate");
        assert_eq!(candidate.payload.kind(), "ice_candidate");
    }
}
