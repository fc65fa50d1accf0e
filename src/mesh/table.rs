//! Owned table of per-peer negotiation objects.

use std::collections::HashMap;
use std::sync::Arc;

use crate::link::{LinkError, LinkFactory, PeerLink};
use crate::media::MediaSource;

/// Per-peer negotiation phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    New,
    Offering,
    Answering,
    Stable,
    Disconnected,
    Closed,
}

pub struct PeerEntry {
    pub link: Arc<dyn PeerLink>,
    pub phase: ConnectionPhase,
    media_attached: bool,
}

impl PeerEntry {
    fn new(link: Arc<dyn PeerLink>) -> Self {
        Self {
            link,
            phase: ConnectionPhase::New,
            media_attached: false,
        }
    }
}

/// Single owner of every peer link. Insertion is idempotent; eviction closes
/// the underlying negotiation object.
pub struct PeerLinkTable {
    factory: Arc<dyn LinkFactory>,
    entries: HashMap<String, PeerEntry>,
}

impl PeerLinkTable {
    pub fn new(factory: Arc<dyn LinkFactory>) -> Self {
        Self {
            factory,
            entries: HashMap::new(),
        }
    }

    /// Returns the existing entry or creates one in phase `new`. The boolean
    /// is true when the entry was created by this call.
    pub async fn get_or_create(
        &mut self,
        peer_id: &str,
    ) -> Result<(&mut PeerEntry, bool), LinkError> {
        let created = if self.entries.contains_key(peer_id) {
            false
        } else {
            let link = self.factory.create(peer_id).await?;
            self.entries
                .insert(peer_id.to_string(), PeerEntry::new(link));
            tracing::debug!(target: "mesh", peer = peer_id, "created peer link");
            true
        };
        let entry = self
            .entries
            .get_mut(peer_id)
            .expect("entry present after insertion");
        Ok((entry, created))
    }

    pub fn get(&self, peer_id: &str) -> Option<&PeerEntry> {
        self.entries.get(peer_id)
    }

    pub fn get_mut(&mut self, peer_id: &str) -> Option<&mut PeerEntry> {
        self.entries.get_mut(peer_id)
    }

    pub fn contains(&self, peer_id: &str) -> bool {
        self.entries.contains_key(peer_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Attach every locally captured track to the peer's link, at most once
    /// per link.
    pub async fn attach_local_media(
        &mut self,
        peer_id: &str,
        source: &dyn MediaSource,
    ) -> Result<(), LinkError> {
        let Some(entry) = self.entries.get_mut(peer_id) else {
            return Ok(());
        };
        if entry.media_attached {
            return Ok(());
        }
        entry.link.attach_media(source).await?;
        entry.media_attached = true;
        Ok(())
    }

    /// Close and evict the peer's link. No-op for absent peers. Returns true
    /// when an entry was actually removed.
    pub async fn close(&mut self, peer_id: &str) -> bool {
        let Some(mut entry) = self.entries.remove(peer_id) else {
            return false;
        };
        entry.phase = ConnectionPhase::Closed;
        if let Err(err) = entry.link.close().await {
            tracing::warn!(target: "mesh", peer = peer_id, error = %err, "link close failed");
        }
        tracing::debug!(target: "mesh", peer = peer_id, "closed peer link");
        true
    }

    /// Room exit: close every entry.
    pub async fn close_all(&mut self) {
        let ids: Vec<String> = self.entries.keys().cloned().collect();
        for peer_id in ids {
            self.close(&peer_id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::fake::FakeLinkFactory;
    use crate::media::SilentSource;

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let factory = FakeLinkFactory::new();
        let mut table = PeerLinkTable::new(factory.clone());

        let (_, created) = table.get_or_create("b").await.unwrap();
        assert!(created);
        let (entry, created) = table.get_or_create("b").await.unwrap();
        assert!(!created);
        assert_eq!(entry.phase, ConnectionPhase::New);
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn media_attaches_once_per_link() {
        let factory = FakeLinkFactory::new();
        let mut table = PeerLinkTable::new(factory.clone());
        table.get_or_create("b").await.unwrap();

        let source = SilentSource;
        table.attach_local_media("b", &source).await.unwrap();
        table.attach_local_media("b", &source).await.unwrap();

        let attaches = factory
            .link("b")
            .unwrap()
            .calls()
            .into_iter()
            .filter(|call| matches!(call, crate::link::fake::FakeCall::AttachMedia(_)))
            .count();
        assert_eq!(attaches, 1);
    }

    #[tokio::test]
    async fn close_is_safe_on_absent_peers() {
        let factory = FakeLinkFactory::new();
        let mut table = PeerLinkTable::new(factory);
        assert!(!table.close("ghost").await);
    }

    #[tokio::test]
    async fn close_all_empties_the_table() {
        let factory = FakeLinkFactory::new();
        let mut table = PeerLinkTable::new(factory.clone());
        table.get_or_create("b").await.unwrap();
        table.get_or_create("c").await.unwrap();

        table.close_all().await;
        assert!(table.is_empty());
        assert!(factory.link("b").unwrap().is_closed());
        assert!(factory.link("c").unwrap().is_closed());
    }
}
