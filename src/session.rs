//! One joined room, end to end: the relay channel, the peer mesh, and chat,
//! driven by a single event loop.

use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::chat::{ChatRelay, RoomSink};
use crate::error::SessionError;
use crate::link::webrtc_link::WebRtcLinkFactory;
use crate::link::{LinkEvent, LinkFactory};
use crate::media::{AudioSink, MediaSource};
use crate::mesh::MeshController;
use crate::protocol::RelayEnvelope;
use crate::relay::{RelayChannel, RelayConfig, RelayEvent};
use crate::rooms::{RoomDirectory, RoomSummary};

#[derive(Debug, Clone)]
pub struct JoinParams {
    pub server: String,
    /// Room id or exact room name.
    pub room: String,
    pub password: String,
    pub nickname: String,
    pub stun_servers: Vec<String>,
}

/// Commands the UI pushes into the running session.
#[derive(Debug)]
pub enum SessionCommand {
    Chat(String),
    Leave,
}

/// Cloneable handle for driving a running session from the outside.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    pub fn send_chat(&self, text: String) {
        let _ = self.commands.send(SessionCommand::Chat(text));
    }

    pub fn leave(&self) {
        let _ = self.commands.send(SessionCommand::Leave);
    }
}

pub struct RoomSession {
    room: RoomSummary,
    controller: MeshController,
    chat: ChatRelay,
    channel: Option<RelayChannel>,
    relay_events: mpsc::UnboundedReceiver<RelayEvent>,
    link_events: mpsc::UnboundedReceiver<LinkEvent>,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    handle: SessionHandle,
}

impl RoomSession {
    /// Resolve the room, verify the password, open the relay channel, seed
    /// the mesh from the current roster, and announce ourselves. On return
    /// the session is live and `run` drives it to completion.
    pub async fn join(
        params: JoinParams,
        media: Arc<dyn MediaSource>,
        audio_sink: Arc<dyn AudioSink>,
        room_sink: Arc<dyn RoomSink>,
    ) -> Result<Self, SessionError> {
        let directory = RoomDirectory::new(&params.server)?;
        let room = directory.find(&params.room).await?;
        if room.has_password {
            directory.check_password(&room.id, &params.password).await?;
        }

        let user_id = Uuid::new_v4().to_string();
        tracing::info!(target: "session", room = %room.name, peer = %user_id, "joining room");

        let (channel, relay_events) = RelayChannel::connect(&RelayConfig {
            server: params.server.clone(),
            room_id: room.id.clone(),
            user_id: user_id.clone(),
            password: params.password.clone(),
        })
        .await?;

        let (link_tx, link_events) = mpsc::unbounded_channel();
        let factory: Arc<dyn LinkFactory> = Arc::new(WebRtcLinkFactory::new(
            params.stun_servers.clone(),
            link_tx,
            audio_sink,
        )?);

        let mut controller =
            MeshController::new(user_id.clone(), factory, media, channel.sender());
        let chat = ChatRelay::new(params.nickname.clone(), channel.sender(), room_sink);

        // Members already in the room get link entries now; they will offer
        // toward us once our announcement reaches them. A 404 just means we
        // are the first member.
        match directory.users(&room.id).await {
            Ok(existing) => {
                controller
                    .seed_roster(existing.into_iter().filter(|id| *id != user_id).collect())
                    .await
            }
            Err(SessionError::RoomMissing) => {}
            Err(err) => {
                tracing::warn!(target: "session", error = %err, "roster query failed, relying on announcements");
            }
        }
        controller.announce();

        let (command_tx, commands) = mpsc::unbounded_channel();
        Ok(Self {
            room,
            controller,
            chat,
            channel: Some(channel),
            relay_events,
            link_events,
            commands,
            handle: SessionHandle {
                commands: command_tx,
            },
        })
    }

    pub fn room(&self) -> &RoomSummary {
        &self.room
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Drive the session until the user leaves or the relay goes away.
    pub async fn run(&mut self) -> Result<(), SessionError> {
        loop {
            tokio::select! {
                event = self.relay_events.recv() => match event {
                    Some(RelayEvent::Envelope(envelope)) => self.dispatch(envelope).await,
                    Some(RelayEvent::Closed { reason }) => {
                        tracing::warn!(target: "session", %reason, "relay connection lost");
                        self.shutdown().await;
                        return Err(SessionError::RelayClosed(reason));
                    }
                    None => {
                        self.shutdown().await;
                        return Err(SessionError::ChannelClosed);
                    }
                },
                Some(event) = self.link_events.recv() => {
                    self.controller.handle_link_event(event).await;
                }
                command = self.commands.recv() => match command {
                    Some(SessionCommand::Chat(text)) => self.chat.send(&text),
                    Some(SessionCommand::Leave) | None => {
                        self.shutdown().await;
                        return Ok(());
                    }
                },
            }
        }
    }

    async fn dispatch(&mut self, envelope: RelayEnvelope) {
        match envelope {
            RelayEnvelope::Chat { message, nickname } => self.chat.receive(message, nickname),
            RelayEnvelope::UserCount { count } => self.chat.user_count(count),
            other => self.controller.handle_envelope(other).await,
        }
    }

    /// Tear the mesh down and close the relay channel. Safe to call when the
    /// relay is already gone; the departure announcement is best-effort.
    async fn shutdown(&mut self) {
        self.controller.leave().await;
        if let Some(channel) = self.channel.take() {
            channel.disconnect().await;
        }
        tracing::info!(target: "session", room = %self.room.name, "session ended");
    }
}
