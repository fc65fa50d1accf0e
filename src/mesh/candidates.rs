//! Buffering and dedup for connectivity candidates that race ahead of their
//! peer link's remote description.

use std::collections::{HashMap, HashSet};

use crate::link::{LinkError, PeerLink};
use crate::protocol::CandidateBlob;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateDisposition {
    Duplicate,
    Applied,
    Buffered,
}

#[derive(Default)]
pub struct CandidateQueue {
    pending: HashMap<String, Vec<CandidateBlob>>,
    seen: HashMap<String, HashSet<String>>,
}

impl CandidateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply the candidate if the link already has a remote description,
    /// otherwise buffer it. Duplicates (by candidate identity) are discarded
    /// silently, whether the original was applied or is still buffered.
    pub async fn enqueue_or_apply(
        &mut self,
        peer_id: &str,
        candidate: CandidateBlob,
        link: &dyn PeerLink,
    ) -> Result<CandidateDisposition, LinkError> {
        let identity = candidate.identity();
        let seen = self.seen.entry(peer_id.to_string()).or_default();
        if !seen.insert(identity) {
            return Ok(CandidateDisposition::Duplicate);
        }
        if link.remote_description_set().await {
            link.add_ice_candidate(candidate).await?;
            Ok(CandidateDisposition::Applied)
        } else {
            self.pending
                .entry(peer_id.to_string())
                .or_default()
                .push(candidate);
            Ok(CandidateDisposition::Buffered)
        }
    }

    /// Apply every buffered candidate for the peer in arrival order, then
    /// clear the buffer. Individual application failures are logged and
    /// skipped so one bad candidate cannot starve the rest.
    pub async fn flush(&mut self, peer_id: &str, link: &dyn PeerLink) -> usize {
        let buffered = self.pending.remove(peer_id).unwrap_or_default();
        let mut applied = 0;
        for candidate in buffered {
            match link.add_ice_candidate(candidate).await {
                Ok(()) => applied += 1,
                Err(err) => tracing::warn!(
                    target: "mesh",
                    peer = peer_id,
                    error = %err,
                    "buffered candidate failed to apply, skipping"
                ),
            }
        }
        applied
    }

    /// Discard buffer and seen-set on peer teardown.
    pub fn drop_peer(&mut self, peer_id: &str) {
        self.pending.remove(peer_id);
        self.seen.remove(peer_id);
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.seen.clear();
    }

    /// True when neither buffered candidates nor seen-set entries remain for
    /// the peer.
    pub fn is_empty_for(&self, peer_id: &str) -> bool {
        !self.pending.contains_key(peer_id) && !self.seen.contains_key(peer_id)
    }

    pub fn buffered_count(&self, peer_id: &str) -> usize {
        self.pending.get(peer_id).map_or(0, Vec::len)
    }
}
