//! Production `PeerLink` on top of the `webrtc` crate.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_remote::TrackRemote;

use super::{LinkError, LinkEvent, LinkFactory, LinkHealth, PeerLink};
use crate::media::{AudioSink, MediaSource};
use crate::protocol::CandidateBlob;

/// Builds peer connections with a shared API object (media engine with the
/// default audio codecs plus default interceptors) and a fixed STUN
/// configuration, and wires per-link callbacks into the session event channel.
pub struct WebRtcLinkFactory {
    api: API,
    stun_servers: Vec<String>,
    events: mpsc::UnboundedSender<LinkEvent>,
    audio_sink: Arc<dyn AudioSink>,
}

impl WebRtcLinkFactory {
    pub fn new(
        stun_servers: Vec<String>,
        events: mpsc::UnboundedSender<LinkEvent>,
        audio_sink: Arc<dyn AudioSink>,
    ) -> Result<Self, LinkError> {
        let mut media = MediaEngine::default();
        media.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media)
            .map_err(|err| LinkError::Setup(err.to_string()))?;
        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();
        Ok(Self {
            api,
            stun_servers,
            events,
            audio_sink,
        })
    }

    fn wire_callbacks(&self, peer_id: &str, pc: &Arc<RTCPeerConnection>) {
        let events = self.events.clone();
        let peer = peer_id.to_string();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let events = events.clone();
            let peer = peer.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else { return };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = events.send(LinkEvent::LocalCandidate {
                            peer_id: peer,
                            candidate: init.into(),
                        });
                    }
                    Err(err) => tracing::warn!(
                        target: "link",
                        peer = %peer,
                        error = %err,
                        "failed to serialize local candidate"
                    ),
                }
            })
        }));

        let events = self.events.clone();
        let peer = peer_id.to_string();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let events = events.clone();
            let peer = peer.clone();
            Box::pin(async move {
                tracing::debug!(target: "link", peer = %peer, state = ?state, "connection state changed");
                let health = match state {
                    RTCPeerConnectionState::Connected => Some(LinkHealth::Connected),
                    RTCPeerConnectionState::Disconnected | RTCPeerConnectionState::Failed => {
                        Some(LinkHealth::Lost)
                    }
                    RTCPeerConnectionState::Closed => Some(LinkHealth::Closed),
                    _ => None,
                };
                if let Some(health) = health {
                    let _ = events.send(LinkEvent::Health {
                        peer_id: peer,
                        health,
                    });
                }
            })
        }));

        let sink = Arc::clone(&self.audio_sink);
        let peer = peer_id.to_string();
        pc.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
            let sink = Arc::clone(&sink);
            let peer = peer.clone();
            Box::pin(async move {
                tracing::info!(target: "link", peer = %peer, kind = %track.kind(), "remote track arrived");
                sink.on_remote_track(&peer, track);
            })
        }));
    }
}

#[async_trait]
impl LinkFactory for WebRtcLinkFactory {
    async fn create(&self, peer_id: &str) -> Result<Arc<dyn PeerLink>, LinkError> {
        let config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: self.stun_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let pc = Arc::new(self.api.new_peer_connection(config).await?);
        self.wire_callbacks(peer_id, &pc);
        Ok(Arc::new(WebRtcLink { pc }))
    }
}

pub struct WebRtcLink {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl PeerLink for WebRtcLink {
    async fn create_offer(&self, ice_restart: bool) -> Result<RTCSessionDescription, LinkError> {
        let options = ice_restart.then(|| RTCOfferOptions {
            ice_restart: true,
            ..Default::default()
        });
        Ok(self.pc.create_offer(options).await?)
    }

    async fn create_answer(&self) -> Result<RTCSessionDescription, LinkError> {
        Ok(self.pc.create_answer(None).await?)
    }

    async fn set_local_description(&self, desc: RTCSessionDescription) -> Result<(), LinkError> {
        Ok(self.pc.set_local_description(desc).await?)
    }

    async fn set_remote_description(&self, desc: RTCSessionDescription) -> Result<(), LinkError> {
        Ok(self.pc.set_remote_description(desc).await?)
    }

    async fn add_ice_candidate(&self, candidate: CandidateBlob) -> Result<(), LinkError> {
        self.pc
            .add_ice_candidate(candidate.into())
            .await
            .map_err(|err| LinkError::Candidate(err.to_string()))
    }

    async fn remote_description_set(&self) -> bool {
        self.pc.remote_description().await.is_some()
    }

    async fn attach_media(&self, source: &dyn MediaSource) -> Result<(), LinkError> {
        let tracks = source.tracks();
        if tracks.is_empty() {
            // Receive-only session: without a local track the offer would
            // carry no audio section at all.
            self.pc
                .add_transceiver_from_kind(
                    RTPCodecType::Audio,
                    Some(RTCRtpTransceiverInit {
                        direction: RTCRtpTransceiverDirection::Recvonly,
                        send_encodings: Vec::new(),
                    }),
                )
                .await?;
            return Ok(());
        }
        for track in tracks {
            self.pc.add_track(track).await?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), LinkError> {
        Ok(self.pc.close().await?)
    }
}
