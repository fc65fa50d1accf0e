//! Wire envelopes exchanged over the relay WebSocket.
//!
//! The relay does not understand payloads; it fans every frame out to every
//! member of a room, including the sender. Broadcast envelopes carry a
//! `"type"` tag; targeted signaling envelopes carry no tag and are classified
//! by the presence of an `sdp` or `candidate` field.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unrecognized envelope shape")]
    UnknownShape,
}

/// A connectivity candidate as it appears on the wire. Field names follow the
/// browser's `RTCIceCandidate.toJSON()` so relays with mixed clients stay
/// interoperable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateBlob {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl CandidateBlob {
    /// Identity used for duplicate suppression. The relay's fan-out plus
    /// client retries can deliver the same candidate more than once.
    pub fn identity(&self) -> String {
        format!(
            "{}|{}|{}",
            self.candidate,
            self.sdp_mid.as_deref().unwrap_or(""),
            self.sdp_mline_index.map(|i| i as i32).unwrap_or(-1),
        )
    }
}

impl From<RTCIceCandidateInit> for CandidateBlob {
    fn from(init: RTCIceCandidateInit) -> Self {
        Self {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
            username_fragment: init.username_fragment,
        }
    }
}

impl From<CandidateBlob> for RTCIceCandidateInit {
    fn from(blob: CandidateBlob) -> Self {
        Self {
            candidate: blob.candidate,
            sdp_mid: blob.sdp_mid,
            sdp_mline_index: blob.sdp_mline_index,
            username_fragment: blob.username_fragment,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescriptionEnvelope {
    pub from: String,
    pub to: String,
    pub sdp: RTCSessionDescription,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateEnvelope {
    pub from: String,
    pub to: String,
    pub candidate: CandidateBlob,
}

#[derive(Debug, Clone)]
pub enum RelayEnvelope {
    NewPeer { peer_id: String },
    PeerLeft { peer_id: String },
    Description(DescriptionEnvelope),
    Candidate(CandidateEnvelope),
    Chat { message: String, nickname: String },
    UserCount { count: u32 },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum TaggedEnvelope {
    NewPeer {
        #[serde(rename = "peerId")]
        peer_id: String,
    },
    PeerLeft {
        #[serde(rename = "peerId")]
        peer_id: String,
    },
    Chat {
        message: String,
        nickname: String,
    },
    UserCount {
        user_count: u32,
    },
}

impl RelayEnvelope {
    /// Parse one relay text frame. Unknown tags and unrecognized shapes are
    /// errors so the channel adapter can drop them without dispatching.
    pub fn parse(frame: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(frame)?;
        if value.get("type").is_some() {
            let tagged: TaggedEnvelope = serde_json::from_value(value)?;
            return Ok(match tagged {
                TaggedEnvelope::NewPeer { peer_id } => RelayEnvelope::NewPeer { peer_id },
                TaggedEnvelope::PeerLeft { peer_id } => RelayEnvelope::PeerLeft { peer_id },
                TaggedEnvelope::Chat { message, nickname } => {
                    RelayEnvelope::Chat { message, nickname }
                }
                TaggedEnvelope::UserCount { user_count } => {
                    RelayEnvelope::UserCount { count: user_count }
                }
            });
        }
        if value.get("sdp").is_some() {
            return Ok(RelayEnvelope::Description(serde_json::from_value(value)?));
        }
        if value.get("candidate").is_some() {
            return Ok(RelayEnvelope::Candidate(serde_json::from_value(value)?));
        }
        Err(ProtocolError::UnknownShape)
    }

    pub fn to_frame(&self) -> Result<String, ProtocolError> {
        let value = match self {
            RelayEnvelope::NewPeer { peer_id } => json!({"type": "new_peer", "peerId": peer_id}),
            RelayEnvelope::PeerLeft { peer_id } => json!({"type": "peer_left", "peerId": peer_id}),
            RelayEnvelope::Description(desc) => serde_json::to_value(desc)?,
            RelayEnvelope::Candidate(cand) => serde_json::to_value(cand)?,
            RelayEnvelope::Chat { message, nickname } => {
                json!({"type": "chat", "message": message, "nickname": nickname})
            }
            RelayEnvelope::UserCount { count } => {
                json!({"type": "user_count", "user_count": count})
            }
        };
        Ok(serde_json::to_string(&value)?)
    }

    /// `(from, to)` for targeted envelopes, `None` for broadcasts.
    pub fn addressing(&self) -> Option<(&str, &str)> {
        match self {
            RelayEnvelope::Description(d) => Some((d.from.as_str(), d.to.as_str())),
            RelayEnvelope::Candidate(c) => Some((c.from.as_str(), c.to.as_str())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;

    #[test]
    fn parses_tagged_broadcasts() {
        match RelayEnvelope::parse(r#"{"type":"new_peer","peerId":"abc"}"#).unwrap() {
            RelayEnvelope::NewPeer { peer_id } => assert_eq!(peer_id, "abc"),
            other => panic!("unexpected envelope: {other:?}"),
        }
        match RelayEnvelope::parse(r#"{"type":"user_count","user_count":3}"#).unwrap() {
            RelayEnvelope::UserCount { count } => assert_eq!(count, 3),
            other => panic!("unexpected envelope: {other:?}"),
        }
    }

    #[test]
    fn parses_targeted_description() {
        let frame = r#"{"from":"a","to":"b","sdp":{"type":"offer","sdp":"v=0"}}"#;
        match RelayEnvelope::parse(frame).unwrap() {
            RelayEnvelope::Description(env) => {
                assert_eq!(env.from, "a");
                assert_eq!(env.to, "b");
                assert_eq!(env.sdp.sdp_type, RTCSdpType::Offer);
            }
            other => panic!("unexpected envelope: {other:?}"),
        }
    }

    #[test]
    fn parses_browser_style_candidate() {
        let frame = r#"{"from":"a","to":"b","candidate":{"candidate":"candidate:1 1 udp 2130706431 192.0.2.1 54321 typ host","sdpMid":"0","sdpMLineIndex":0}}"#;
        match RelayEnvelope::parse(frame).unwrap() {
            RelayEnvelope::Candidate(env) => {
                assert_eq!(env.candidate.sdp_mid.as_deref(), Some("0"));
                assert_eq!(env.candidate.sdp_mline_index, Some(0));
            }
            other => panic!("unexpected envelope: {other:?}"),
        }
    }

    #[test]
    fn rejects_malformed_frames() {
        assert!(RelayEnvelope::parse("not json").is_err());
        assert!(RelayEnvelope::parse(r#"{"hello":"world"}"#).is_err());
        assert!(RelayEnvelope::parse(r#"{"type":"mystery"}"#).is_err());
    }

    #[test]
    fn round_trips_chat_frame() {
        let env = RelayEnvelope::Chat {
            message: "hi".into(),
            nickname: "bob".into(),
        };
        let frame = env.to_frame().unwrap();
        match RelayEnvelope::parse(&frame).unwrap() {
            RelayEnvelope::Chat { message, nickname } => {
                assert_eq!(message, "hi");
                assert_eq!(nickname, "bob");
            }
            other => panic!("unexpected envelope: {other:?}"),
        }
    }

    #[test]
    fn candidate_identity_ignores_username_fragment() {
        let mut a = CandidateBlob {
            candidate: "candidate:1".into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        };
        let b = a.clone();
        a.username_fragment = Some("ufrag".into());
        assert_eq!(a.identity(), b.identity());
    }
}
