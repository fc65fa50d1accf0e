//! Scriptable in-memory `PeerLink` for exercising the mesh without any
//! network or negotiation machinery.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use super::{LinkError, LinkFactory, PeerLink};
use crate::media::MediaSource;
use crate::protocol::CandidateBlob;

pub fn fake_description(kind: RTCSdpType, label: &str) -> RTCSessionDescription {
    serde_json::from_value(serde_json::json!({
        "type": kind.to_string(),
        "sdp": format!("v=0 {label}"),
    }))
    .expect("fake description deserializes")
}

pub fn fake_candidate(label: &str) -> CandidateBlob {
    CandidateBlob {
        candidate: format!("candidate:{label} 1 udp 1 192.0.2.1 9 typ host"),
        sdp_mid: Some("0".into()),
        sdp_mline_index: Some(0),
        username_fragment: None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeCall {
    CreateOffer { ice_restart: bool },
    CreateAnswer,
    SetLocal(RTCSdpType),
    SetRemote(RTCSdpType),
    AddCandidate(String),
    AttachMedia(usize),
    Close,
}

#[derive(Default)]
pub struct FakeLink {
    peer_id: String,
    calls: Mutex<Vec<FakeCall>>,
    remote_set: AtomicBool,
    local_offer_pending: AtomicBool,
    closed: AtomicBool,
    fail_remote_description: AtomicBool,
    failing_candidates: Mutex<Vec<String>>,
}

impl FakeLink {
    pub fn new(peer_id: &str) -> Arc<Self> {
        Arc::new(Self {
            peer_id: peer_id.to_string(),
            ..Default::default()
        })
    }

    pub fn calls(&self) -> Vec<FakeCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn applied_candidates(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                FakeCall::AddCandidate(identity) => Some(identity),
                _ => None,
            })
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Make the next `set_remote_description` fail.
    pub fn fail_remote_description(&self) {
        self.fail_remote_description.store(true, Ordering::SeqCst);
    }

    /// Make `add_ice_candidate` fail for candidates with this identity.
    pub fn fail_candidate(&self, identity: &str) {
        self.failing_candidates
            .lock()
            .unwrap()
            .push(identity.to_string());
    }

    fn record(&self, call: FakeCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl PeerLink for FakeLink {
    async fn create_offer(&self, ice_restart: bool) -> Result<RTCSessionDescription, LinkError> {
        self.record(FakeCall::CreateOffer { ice_restart });
        Ok(fake_description(
            RTCSdpType::Offer,
            &format!("offer-for-{}", self.peer_id),
        ))
    }

    async fn create_answer(&self) -> Result<RTCSessionDescription, LinkError> {
        self.record(FakeCall::CreateAnswer);
        Ok(fake_description(
            RTCSdpType::Answer,
            &format!("answer-for-{}", self.peer_id),
        ))
    }

    async fn set_local_description(&self, desc: RTCSessionDescription) -> Result<(), LinkError> {
        self.record(FakeCall::SetLocal(desc.sdp_type));
        match desc.sdp_type {
            RTCSdpType::Offer => self.local_offer_pending.store(true, Ordering::SeqCst),
            RTCSdpType::Answer => self.local_offer_pending.store(false, Ordering::SeqCst),
            _ => {}
        }
        Ok(())
    }

    async fn set_remote_description(&self, desc: RTCSessionDescription) -> Result<(), LinkError> {
        if self.fail_remote_description.swap(false, Ordering::SeqCst) {
            return Err(LinkError::Negotiation("scripted failure".into()));
        }
        // Same signaling-state rule as the production link: a pending local
        // offer cannot coexist with a remote one.
        if desc.sdp_type == RTCSdpType::Offer && self.local_offer_pending.load(Ordering::SeqCst) {
            return Err(LinkError::Negotiation(
                "remote offer while a local offer is pending".into(),
            ));
        }
        self.record(FakeCall::SetRemote(desc.sdp_type));
        self.remote_set.store(true, Ordering::SeqCst);
        if desc.sdp_type == RTCSdpType::Answer {
            self.local_offer_pending.store(false, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: CandidateBlob) -> Result<(), LinkError> {
        let identity = candidate.identity();
        if self.failing_candidates.lock().unwrap().contains(&identity) {
            return Err(LinkError::Candidate("scripted failure".into()));
        }
        self.record(FakeCall::AddCandidate(identity));
        Ok(())
    }

    async fn remote_description_set(&self) -> bool {
        self.remote_set.load(Ordering::SeqCst)
    }

    async fn attach_media(&self, source: &dyn MediaSource) -> Result<(), LinkError> {
        self.record(FakeCall::AttachMedia(source.tracks().len()));
        Ok(())
    }

    async fn close(&self) -> Result<(), LinkError> {
        self.record(FakeCall::Close);
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out `FakeLink`s and keeps them around for inspection.
#[derive(Default)]
pub struct FakeLinkFactory {
    links: Mutex<HashMap<String, Arc<FakeLink>>>,
    fail_create: AtomicBool,
}

impl FakeLinkFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn link(&self, peer_id: &str) -> Option<Arc<FakeLink>> {
        self.links.lock().unwrap().get(peer_id).cloned()
    }

    pub fn fail_next_create(&self) {
        self.fail_create.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl LinkFactory for FakeLinkFactory {
    async fn create(&self, peer_id: &str) -> Result<Arc<dyn PeerLink>, LinkError> {
        if self.fail_create.swap(false, Ordering::SeqCst) {
            return Err(LinkError::Setup("scripted create failure".into()));
        }
        let link = FakeLink::new(peer_id);
        self.links
            .lock()
            .unwrap()
            .insert(peer_id.to_string(), Arc::clone(&link));
        Ok(link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn remote_offer_rejected_while_local_offer_pending() {
        let a = FakeLink::new("b");
        let b = FakeLink::new("a");

        // Both sides offer at once.
        let offer_a = a.create_offer(false).await.unwrap();
        a.set_local_description(offer_a).await.unwrap();
        let offer_b = b.create_offer(false).await.unwrap();
        b.set_local_description(offer_b.clone()).await.unwrap();

        // Applying the remote offer over a pending local one fails, like the
        // production signaling state machine.
        assert!(a.set_remote_description(offer_b.clone()).await.is_err());

        // A fresh link takes the same offer.
        let replacement = FakeLink::new("b");
        replacement.set_remote_description(offer_b).await.unwrap();
        assert!(replacement.remote_description_set().await);
    }

    #[tokio::test]
    async fn answer_clears_the_pending_local_offer() {
        let link = FakeLink::new("b");
        let offer = link.create_offer(false).await.unwrap();
        link.set_local_description(offer).await.unwrap();

        link.set_remote_description(fake_description(RTCSdpType::Answer, "x"))
            .await
            .unwrap();

        // Renegotiation offers are accepted once the exchange completed.
        link.set_remote_description(fake_description(RTCSdpType::Offer, "restart"))
            .await
            .unwrap();
    }
}
