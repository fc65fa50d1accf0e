//! The peer-mesh coordinator: membership, negotiation phases, glare
//! resolution, and renegotiation on connectivity loss.
//!
//! Every client derives the same full-mesh topology from the same relay
//! broadcast stream. There is no central arbiter: the only shared truth is
//! the deterministic initiator rule, a pure comparison over peer ids that
//! both sides of a pair compute independently.

use std::sync::Arc;

use tokio::sync::mpsc;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::link::{LinkEvent, LinkFactory, LinkHealth};
use crate::media::MediaSource;
use crate::protocol::{CandidateBlob, CandidateEnvelope, DescriptionEnvelope, RelayEnvelope};

pub mod candidates;
pub mod table;

pub use candidates::{CandidateDisposition, CandidateQueue};
pub use table::{ConnectionPhase, PeerLinkTable};

/// Deterministic initiator for a peer pair: the lexically greater id offers
/// (and re-offers after connectivity loss), the lesser id accepts under
/// glare. Any client computes the same answer for the same pair.
pub fn is_initiator(local: &str, remote: &str) -> bool {
    local > remote
}

pub struct MeshController {
    self_id: String,
    table: PeerLinkTable,
    candidates: CandidateQueue,
    roster: Vec<String>,
    outbound: mpsc::UnboundedSender<RelayEnvelope>,
    media: Arc<dyn MediaSource>,
}

impl MeshController {
    pub fn new(
        self_id: String,
        factory: Arc<dyn LinkFactory>,
        media: Arc<dyn MediaSource>,
        outbound: mpsc::UnboundedSender<RelayEnvelope>,
    ) -> Self {
        Self {
            self_id,
            table: PeerLinkTable::new(factory),
            candidates: CandidateQueue::new(),
            roster: Vec::new(),
            outbound,
            media,
        }
    }

    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    /// Remote peers currently believed connected, in arrival order.
    pub fn roster(&self) -> &[String] {
        &self.roster
    }

    pub fn phase(&self, peer_id: &str) -> Option<ConnectionPhase> {
        self.table.get(peer_id).map(|entry| entry.phase)
    }

    pub fn candidate_queue(&self) -> &CandidateQueue {
        &self.candidates
    }

    pub fn has_link(&self, peer_id: &str) -> bool {
        self.table.contains(peer_id)
    }

    /// Announce ourselves to the room. The relay echoes this back to us as
    /// well; the self-id guard in `handle_new_peer` absorbs it.
    pub fn announce(&mut self) {
        self.send(RelayEnvelope::NewPeer {
            peer_id: self.self_id.clone(),
        });
    }

    /// Seed the roster from the room membership query at join time. Entries
    /// are created so early candidates have somewhere to buffer, but no
    /// offers are sent: existing members initiate toward the newcomer when
    /// they see its announcement.
    pub async fn seed_roster(&mut self, peers: Vec<String>) {
        for peer_id in peers {
            if peer_id == self.self_id {
                continue;
            }
            if let Err(err) = self.admit(&peer_id).await {
                tracing::warn!(target: "mesh", peer = %peer_id, error = %err, "failed to seed peer");
            }
        }
    }

    pub async fn handle_envelope(&mut self, envelope: RelayEnvelope) {
        match envelope {
            RelayEnvelope::NewPeer { peer_id } => self.handle_new_peer(&peer_id).await,
            RelayEnvelope::PeerLeft { peer_id } => self.handle_peer_left(&peer_id).await,
            RelayEnvelope::Description(env) => self.handle_description(&env.from, env.sdp).await,
            RelayEnvelope::Candidate(env) => self.handle_candidate(&env.from, env.candidate).await,
            RelayEnvelope::Chat { .. } | RelayEnvelope::UserCount { .. } => {
                tracing::trace!(target: "mesh", "non-mesh envelope ignored");
            }
        }
    }

    pub async fn handle_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::LocalCandidate { peer_id, candidate } => {
                // The link may have been torn down while the candidate was
                // being gathered.
                if !self.table.contains(&peer_id) {
                    return;
                }
                self.send(RelayEnvelope::Candidate(CandidateEnvelope {
                    from: self.self_id.clone(),
                    to: peer_id,
                    candidate,
                }));
            }
            LinkEvent::Health { peer_id, health } => self.handle_health(&peer_id, health).await,
        }
    }

    /// Leave the room: announce departure, tear down every link, and forget
    /// all buffered state. No partial mesh state survives this call.
    pub async fn leave(&mut self) {
        self.send(RelayEnvelope::PeerLeft {
            peer_id: self.self_id.clone(),
        });
        self.table.close_all().await;
        self.candidates.clear();
        self.roster.clear();
        tracing::info!(target: "mesh", "left room, mesh torn down");
    }

    /// Ensure roster membership and a link entry for the peer. Returns true
    /// when the entry was created by this call. Media attachment failure is
    /// peer-local and non-fatal: the link proceeds receive-only.
    async fn admit(&mut self, peer_id: &str) -> Result<bool, crate::link::LinkError> {
        if !self.roster.iter().any(|id| id == peer_id) {
            self.roster.push(peer_id.to_string());
        }
        let (_, created) = self.table.get_or_create(peer_id).await?;
        if let Err(err) = self.table.attach_local_media(peer_id, self.media.as_ref()).await {
            tracing::warn!(target: "mesh", peer = peer_id, error = %err, "local media attach failed, continuing without");
        }
        Ok(created)
    }

    async fn handle_new_peer(&mut self, peer_id: &str) {
        if peer_id == self.self_id {
            return;
        }
        match self.admit(peer_id).await {
            Ok(true) => {
                tracing::info!(target: "mesh", peer = peer_id, "peer joined, initiating offer");
                self.initiate_offer(peer_id, false).await;
            }
            Ok(false) => {
                tracing::debug!(target: "mesh", peer = peer_id, "duplicate join announcement ignored");
            }
            Err(err) => {
                tracing::warn!(target: "mesh", peer = peer_id, error = %err, "could not create link for joining peer");
            }
        }
    }

    async fn handle_peer_left(&mut self, peer_id: &str) {
        if peer_id == self.self_id {
            return;
        }
        self.roster.retain(|id| id != peer_id);
        self.table.close(peer_id).await;
        self.candidates.drop_peer(peer_id);
        tracing::info!(target: "mesh", peer = peer_id, "peer left, link torn down");
    }

    async fn handle_description(&mut self, from: &str, sdp: RTCSessionDescription) {
        match sdp.sdp_type {
            RTCSdpType::Offer => self.handle_offer(from, sdp).await,
            RTCSdpType::Answer => self.handle_answer(from, sdp).await,
            other => {
                tracing::warn!(target: "mesh", peer = from, kind = %other, "unsupported description kind dropped");
            }
        }
    }

    async fn handle_offer(&mut self, from: &str, sdp: RTCSessionDescription) {
        if let Err(err) = self.admit(from).await {
            tracing::warn!(target: "mesh", peer = from, error = %err, "could not create link for offering peer");
            return;
        }
        let phase = match self.table.get(from) {
            Some(entry) => entry.phase,
            None => return,
        };

        // Glare: both sides offered at once. The deterministic tie-break
        // keeps exactly one offer alive; the greater id stands by its own
        // offer, the lesser id accepts the incoming one.
        if phase == ConnectionPhase::Offering {
            if is_initiator(&self.self_id, from) {
                tracing::info!(target: "mesh", peer = from, "glare resolved: keeping local offer");
                return;
            }
            // A link with a pending local offer rejects a remote one, so the
            // losing side cannot answer in place. Replace the link and
            // negotiate fresh on the incoming offer; buffered remote
            // candidates survive and flush once it is applied.
            tracing::info!(target: "mesh", peer = from, "glare resolved: discarding local offer");
            self.table.close(from).await;
            if let Err(err) = self.admit(from).await {
                tracing::warn!(target: "mesh", peer = from, error = %err, "could not replace link after glare");
                return;
            }
        }

        let link = match self.table.get(from) {
            Some(entry) => Arc::clone(&entry.link),
            None => return,
        };
        if let Err(err) = link.set_remote_description(sdp).await {
            tracing::warn!(target: "mesh", peer = from, error = %err, "remote offer rejected, phase unchanged");
            return;
        }
        self.candidates.flush(from, link.as_ref()).await;
        if let Some(entry) = self.table.get_mut(from) {
            entry.phase = ConnectionPhase::Answering;
        }

        let answer = match link.create_answer().await {
            Ok(answer) => answer,
            Err(err) => {
                tracing::warn!(target: "mesh", peer = from, error = %err, "answer creation failed");
                return;
            }
        };
        if let Err(err) = link.set_local_description(answer.clone()).await {
            tracing::warn!(target: "mesh", peer = from, error = %err, "local answer rejected");
            return;
        }
        self.send(RelayEnvelope::Description(DescriptionEnvelope {
            from: self.self_id.clone(),
            to: from.to_string(),
            sdp: answer,
        }));
        if let Some(entry) = self.table.get_mut(from) {
            entry.phase = ConnectionPhase::Stable;
        }
        tracing::debug!(target: "mesh", peer = from, "answered offer, link stable");
    }

    async fn handle_answer(&mut self, from: &str, sdp: RTCSessionDescription) {
        let link = match self.table.get(from) {
            Some(entry) if entry.phase == ConnectionPhase::Offering => Arc::clone(&entry.link),
            Some(entry) => {
                tracing::warn!(target: "mesh", peer = from, phase = ?entry.phase, "answer received while not awaiting one, dropped");
                return;
            }
            None => {
                tracing::warn!(target: "mesh", peer = from, "answer from unknown peer dropped");
                return;
            }
        };
        if let Err(err) = link.set_remote_description(sdp).await {
            tracing::warn!(target: "mesh", peer = from, error = %err, "remote answer rejected, phase unchanged");
            return;
        }
        self.candidates.flush(from, link.as_ref()).await;
        if let Some(entry) = self.table.get_mut(from) {
            entry.phase = ConnectionPhase::Stable;
        }
        tracing::debug!(target: "mesh", peer = from, "answer applied, link stable");
    }

    async fn handle_candidate(&mut self, from: &str, candidate: CandidateBlob) {
        if let Err(err) = self.admit(from).await {
            tracing::warn!(target: "mesh", peer = from, error = %err, "could not create link for candidate");
            return;
        }
        let link = match self.table.get(from) {
            Some(entry) => Arc::clone(&entry.link),
            None => return,
        };
        match self
            .candidates
            .enqueue_or_apply(from, candidate, link.as_ref())
            .await
        {
            Ok(disposition) => {
                tracing::trace!(target: "mesh", peer = from, ?disposition, "candidate handled");
            }
            Err(err) => {
                tracing::warn!(target: "mesh", peer = from, error = %err, "candidate application failed");
            }
        }
    }

    async fn handle_health(&mut self, peer_id: &str, health: LinkHealth) {
        match health {
            LinkHealth::Connected => {
                if let Some(entry) = self.table.get_mut(peer_id) {
                    if entry.phase == ConnectionPhase::Disconnected {
                        entry.phase = ConnectionPhase::Stable;
                        tracing::info!(target: "mesh", peer = peer_id, "connectivity recovered");
                    }
                }
            }
            LinkHealth::Lost => {
                let Some(entry) = self.table.get_mut(peer_id) else {
                    return;
                };
                entry.phase = ConnectionPhase::Disconnected;
                tracing::warn!(target: "mesh", peer = peer_id, "connectivity lost");
                // Re-initiation is driven only by this fresh transition,
                // never by a timer, so there is no tight retry loop. Only
                // the designated initiator re-offers; the other side waits
                // for the incoming offer.
                let still_present = self.roster.iter().any(|id| id == peer_id);
                if still_present && is_initiator(&self.self_id, peer_id) {
                    if let Some(entry) = self.table.get_mut(peer_id) {
                        entry.phase = ConnectionPhase::New;
                    }
                    tracing::info!(target: "mesh", peer = peer_id, "re-initiating after connectivity loss");
                    self.initiate_offer(peer_id, true).await;
                }
            }
            LinkHealth::Closed => {}
        }
    }

    async fn initiate_offer(&mut self, peer_id: &str, ice_restart: bool) {
        let link = match self.table.get(peer_id) {
            Some(entry) => Arc::clone(&entry.link),
            None => return,
        };
        let offer = match link.create_offer(ice_restart).await {
            Ok(offer) => offer,
            Err(err) => {
                tracing::warn!(target: "mesh", peer = peer_id, error = %err, "offer creation failed");
                return;
            }
        };
        if let Err(err) = link.set_local_description(offer.clone()).await {
            tracing::warn!(target: "mesh", peer = peer_id, error = %err, "local offer rejected");
            return;
        }
        if let Some(entry) = self.table.get_mut(peer_id) {
            entry.phase = ConnectionPhase::Offering;
        }
        self.send(RelayEnvelope::Description(DescriptionEnvelope {
            from: self.self_id.clone(),
            to: peer_id.to_string(),
            sdp: offer,
        }));
    }

    fn send(&self, envelope: RelayEnvelope) {
        if self.outbound.send(envelope).is_err() {
            tracing::debug!(target: "mesh", "relay writer gone, outbound envelope dropped");
        }
    }
}
