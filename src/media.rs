//! Media seams. Capture and playback live outside this crate; the mesh only
//! needs something that yields local tracks and something that accepts remote
//! ones.

use std::sync::Arc;

use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Produces the locally captured media tracks attached to every peer link.
pub trait MediaSource: Send + Sync {
    fn tracks(&self) -> Vec<Arc<dyn TrackLocal + Send + Sync>>;
}

/// Receives inbound audio for rendering, one callback per remote track.
pub trait AudioSink: Send + Sync {
    fn on_remote_track(&self, peer_id: &str, track: Arc<TrackRemote>);
}

/// Source with no tracks. Used when local capture fails or is absent: the
/// session degrades to receive-only instead of aborting.
#[derive(Debug, Default)]
pub struct SilentSource;

impl MediaSource for SilentSource {
    fn tracks(&self) -> Vec<Arc<dyn TrackLocal + Send + Sync>> {
        Vec::new()
    }
}
