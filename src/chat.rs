//! Text chat over the relay broadcast channel.
//!
//! Chat never rides the peer links; every line goes through the relay, which
//! fans it out to the whole room including the sender. Local messages are
//! rendered optimistically at send time, so the echoed copy has to be
//! suppressed or every own line would appear twice.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::protocol::RelayEnvelope;

/// One rendered chat line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatLine {
    pub nickname: String,
    pub text: String,
    pub is_local: bool,
}

/// Where room-level output goes: chat lines and occupancy updates. The CLI
/// implements this with stdout; tests record.
pub trait RoomSink: Send + Sync {
    fn chat_line(&self, line: ChatLine);
    fn user_count(&self, count: u32);
}

pub struct ChatRelay {
    nickname: String,
    outbound: mpsc::UnboundedSender<RelayEnvelope>,
    sink: Arc<dyn RoomSink>,
}

impl ChatRelay {
    pub fn new(
        nickname: String,
        outbound: mpsc::UnboundedSender<RelayEnvelope>,
        sink: Arc<dyn RoomSink>,
    ) -> Self {
        Self {
            nickname,
            outbound,
            sink,
        }
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    /// Render the line locally and broadcast it. Whitespace-only input is
    /// ignored.
    pub fn send(&self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        self.sink.chat_line(ChatLine {
            nickname: self.nickname.clone(),
            text: text.to_string(),
            is_local: true,
        });
        let envelope = RelayEnvelope::Chat {
            message: text.to_string(),
            nickname: self.nickname.clone(),
        };
        if self.outbound.send(envelope).is_err() {
            tracing::debug!(target: "chat", "relay writer gone, chat line dropped");
        }
    }

    /// Handle an inbound chat broadcast. The relay echoes our own lines back;
    /// those were already rendered at send time and are dropped here.
    pub fn receive(&self, message: String, nickname: String) {
        if nickname == self.nickname {
            tracing::trace!(target: "chat", "own echo suppressed");
            return;
        }
        self.sink.chat_line(ChatLine {
            nickname,
            text: message,
            is_local: false,
        });
    }

    pub fn user_count(&self, count: u32) {
        self.sink.user_count(count);
    }
}
