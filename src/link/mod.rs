//! The point-to-point negotiation primitive, as a capability trait.
//!
//! The mesh drives `PeerLink` objects and never touches the underlying
//! connection machinery directly, so the whole state machine can run against
//! a fake in tests. `webrtc_link.rs` holds the production implementation.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::media::MediaSource;
use crate::protocol::CandidateBlob;

pub mod webrtc_link;

#[cfg(test)]
pub mod fake;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("negotiation failed: {0}")]
    Negotiation(String),
    #[error("candidate rejected: {0}")]
    Candidate(String),
    #[error("link is closed")]
    Closed,
    #[error("link setup failed: {0}")]
    Setup(String),
}

impl From<webrtc::Error> for LinkError {
    fn from(err: webrtc::Error) -> Self {
        LinkError::Negotiation(err.to_string())
    }
}

/// Connectivity-layer health, reduced to what the mesh reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkHealth {
    Connected,
    Lost,
    Closed,
}

/// Events a live link pushes back into the session loop.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// A locally gathered connectivity candidate to forward to the peer.
    LocalCandidate {
        peer_id: String,
        candidate: CandidateBlob,
    },
    Health {
        peer_id: String,
        health: LinkHealth,
    },
}

/// One peer pair's negotiation object.
#[async_trait]
pub trait PeerLink: Send + Sync {
    async fn create_offer(&self, ice_restart: bool) -> Result<RTCSessionDescription, LinkError>;
    async fn create_answer(&self) -> Result<RTCSessionDescription, LinkError>;
    async fn set_local_description(&self, desc: RTCSessionDescription) -> Result<(), LinkError>;
    async fn set_remote_description(&self, desc: RTCSessionDescription) -> Result<(), LinkError>;
    async fn add_ice_candidate(&self, candidate: CandidateBlob) -> Result<(), LinkError>;
    /// Whether a remote description has been applied. Candidates arriving
    /// before this flips must be buffered, not applied.
    async fn remote_description_set(&self) -> bool;
    async fn attach_media(&self, source: &dyn MediaSource) -> Result<(), LinkError>;
    async fn close(&self) -> Result<(), LinkError>;
}

/// Allocates links with the fixed connectivity-discovery configuration and
/// wires their callbacks into the session's event channel.
#[async_trait]
pub trait LinkFactory: Send + Sync {
    async fn create(&self, peer_id: &str) -> Result<Arc<dyn PeerLink>, LinkError>;
}
