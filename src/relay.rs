//! WebSocket channel to the room relay.
//!
//! The relay is a dumb fan-out: every frame a member sends is forwarded to
//! every member of the room, sender included. This adapter owns the socket,
//! serializes outbound envelopes from an unbounded queue, and filters inbound
//! frames down to the ones this client should dispatch.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use crate::error::SessionError;
use crate::protocol::RelayEnvelope;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// HTTP(S) base of the relay server, e.g. `http://127.0.0.1:8000`.
    pub server: String,
    pub room_id: String,
    pub user_id: String,
    pub password: String,
}

impl RelayConfig {
    /// Derive the WebSocket endpoint from the HTTP base: the scheme flips to
    /// `ws`/`wss`, the path becomes `/ws`, and room, identity, and password
    /// travel as query parameters.
    pub fn ws_url(&self) -> Result<Url, SessionError> {
        let mut url = Url::parse(&self.server)
            .map_err(|err| SessionError::RelayUnreachable(err.to_string()))?;
        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme)
            .map_err(|_| SessionError::RelayUnreachable("unsupported relay url".into()))?;
        url.set_path("/ws");
        url.query_pairs_mut()
            .clear()
            .append_pair("room", &self.room_id)
            .append_pair("user_id", &self.user_id)
            .append_pair("password", &self.password);
        Ok(url)
    }
}

/// What the session loop sees from the relay.
#[derive(Debug)]
pub enum RelayEvent {
    Envelope(RelayEnvelope),
    Closed { reason: String },
}

/// Inbound filter. The relay echoes everything to everyone, so targeted
/// frames addressed to someone else, or claiming to come from ourselves, are
/// dropped before dispatch. Broadcasts pass; the mesh and chat layers handle
/// their own self-echoes.
fn admits(self_id: &str, envelope: &RelayEnvelope) -> bool {
    match envelope.addressing() {
        Some((from, to)) => to == self_id && from != self_id,
        None => true,
    }
}

pub struct RelayChannel {
    outbound: mpsc::UnboundedSender<RelayEnvelope>,
    shutdown: Option<oneshot::Sender<()>>,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

impl RelayChannel {
    /// Open the socket and spawn the reader and writer tasks. Returns the
    /// channel handle and the inbound event stream.
    pub async fn connect(
        config: &RelayConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<RelayEvent>), SessionError> {
        let url = config.ws_url()?;
        tracing::info!(target: "relay", room = %config.room_id, "connecting to relay");
        let (stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|err| SessionError::RelayUnreachable(err.to_string()))?;
        let (mut ws_tx, mut ws_rx) = stream.split();

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<RelayEnvelope>();
        let (events_tx, events_rx) = mpsc::unbounded_channel::<RelayEvent>();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let writer = tokio::spawn(async move {
            let write_frame = |envelope: RelayEnvelope| match envelope.to_frame() {
                Ok(frame) => Some(frame),
                Err(err) => {
                    tracing::warn!(target: "relay", error = %err, "failed to encode outbound frame");
                    None
                }
            };
            loop {
                tokio::select! {
                    // Outbound traffic first so a shutdown still drains the
                    // frames already queued (the departure announcement in
                    // particular).
                    biased;
                    envelope = outbound_rx.recv() => {
                        let Some(envelope) = envelope else { break };
                        let Some(frame) = write_frame(envelope) else { continue };
                        if let Err(err) = ws_tx.send(Message::Text(frame)).await {
                            tracing::warn!(target: "relay", error = %err, "relay write failed");
                            return;
                        }
                    }
                    _ = &mut shutdown_rx => {
                        while let Ok(envelope) = outbound_rx.try_recv() {
                            let Some(frame) = write_frame(envelope) else { continue };
                            if ws_tx.send(Message::Text(frame)).await.is_err() {
                                return;
                            }
                        }
                        break;
                    }
                }
            }
            // Local side is done sending; tell the relay we are leaving.
            let _ = ws_tx.send(Message::Close(None)).await;
        });

        let self_id = config.user_id.clone();
        let reader = tokio::spawn(async move {
            loop {
                match ws_rx.next().await {
                    Some(Ok(Message::Text(frame))) => match RelayEnvelope::parse(&frame) {
                        Ok(envelope) => {
                            if !admits(&self_id, &envelope) {
                                tracing::trace!(target: "relay", "frame filtered");
                                continue;
                            }
                            if events_tx.send(RelayEvent::Envelope(envelope)).is_err() {
                                return;
                            }
                        }
                        Err(err) => {
                            tracing::warn!(target: "relay", error = %err, "undecodable frame dropped");
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| f.reason.to_string())
                            .filter(|r| !r.is_empty())
                            .unwrap_or_else(|| "connection closed by relay".into());
                        let _ = events_tx.send(RelayEvent::Closed { reason });
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        let _ = events_tx.send(RelayEvent::Closed {
                            reason: err.to_string(),
                        });
                        return;
                    }
                    None => {
                        let _ = events_tx.send(RelayEvent::Closed {
                            reason: "relay stream ended".into(),
                        });
                        return;
                    }
                }
            }
        });

        Ok((
            Self {
                outbound,
                shutdown: Some(shutdown_tx),
                reader: Some(reader),
                writer: Some(writer),
            },
            events_rx,
        ))
    }

    /// Cloneable handle for enqueueing outbound envelopes. Sends never block;
    /// they fail only once the writer task is gone.
    pub fn sender(&self) -> mpsc::UnboundedSender<RelayEnvelope> {
        self.outbound.clone()
    }

    /// Graceful shutdown: let the writer drain what is already queued and
    /// send the close frame, then stop the reader.
    pub async fn disconnect(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(writer) = self.writer.take() {
            let _ = writer.await;
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

impl Drop for RelayChannel {
    fn drop(&mut self) {
        if let Some(reader) = &self.reader {
            reader.abort();
        }
        if let Some(writer) = &self.writer {
            writer.abort();
        }
    }
}
